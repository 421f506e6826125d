//! Output capping.
//!
//! Captured streams are stored in the run history, so a runaway `print` loop
//! must not turn into a multi-megabyte row. The head keeps the payload's early
//! context, the tail keeps its final result or traceback.

/// Cap `output` at `max_chars` characters, omitting the middle.
///
/// Output within budget comes back unchanged. Otherwise:
///
/// ```text
/// <first max_chars/2 chars>
/// [... N characters omitted ...]
/// <last max_chars/2 chars>
/// ```
///
/// Splits on character boundaries, never inside a multi-byte sequence.
pub fn cap_output(output: &str, max_chars: usize) -> String {
    // Byte length is an upper bound on char count.
    if output.len() <= max_chars {
        return output.to_owned();
    }

    let total = output.chars().count();
    if total <= max_chars {
        return output.to_owned();
    }

    let half = max_chars / 2;
    let head_end = output
        .char_indices()
        .nth(half)
        .map(|(i, _)| i)
        .unwrap_or(output.len());
    let tail_start = output
        .char_indices()
        .nth(total - half)
        .map(|(i, _)| i)
        .unwrap_or(output.len());
    let omitted = total - 2 * half;

    format!(
        "{}\n[... {omitted} characters omitted ...]\n{}",
        &output[..head_end],
        &output[tail_start..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_budget_unchanged() {
        assert_eq!(cap_output("ok\n", 100), "ok\n");
        assert_eq!(cap_output("", 0), "");
        let exact = "x".repeat(64);
        assert_eq!(cap_output(&exact, 64), exact);
    }

    #[test]
    fn keeps_head_and_tail() {
        let input = format!("{}{}{}", "A".repeat(50), "B".repeat(100), "C".repeat(50));
        let capped = cap_output(&input, 100);
        assert!(capped.starts_with(&"A".repeat(50)));
        assert!(capped.ends_with(&"C".repeat(50)));
        assert!(capped.contains("[... 100 characters omitted ...]"));
        assert!(!capped.contains('B'));
    }

    #[test]
    fn multibyte_boundaries() {
        // 3 bytes per char: byte length exceeds the cap long before char count.
        let euros = "€".repeat(40);
        assert_eq!(cap_output(&euros, 50), euros);

        let long = "€".repeat(500);
        let capped = cap_output(&long, 100);
        assert!(capped.contains("400 characters omitted"));
    }
}
