//! Trigger compilation and fire-time arithmetic.
//!
//! A stored [`TriggerSpec`] is compiled into a [`Trigger`] once, when the job
//! is registered. Compilation is where every validation error surfaces; after
//! that, fire-time queries cannot fail, they can only run out of fires.
//!
//! Cron expressions are classic 5-field crontab lines evaluated in one
//! configured timezone. They are normalised into the seconds-prefixed format
//! of the `cron` crate, with the day-of-week field rewritten to day names so
//! that `0` and `7` both mean Sunday.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use herald_core::config::SchedulerConfig;
use herald_store::TriggerSpec;

use crate::error::{Result, SchedulerError};

/// Cron searches further out than this report "no next fire".
const SEARCH_HORIZON_DAYS: i64 = 5 * 366;

/// Upper bound on fire times walked while coalescing a cron backlog.
const MAX_COALESCE_STEPS: usize = 10_000;

const DOW_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Settings shared by every trigger the registry compiles.
#[derive(Debug, Clone, Copy)]
pub struct TriggerContext {
    pub tz: Tz,
    /// Interval triggers fire first at registration time plus this delay.
    pub first_fire_delay: TimeDelta,
}

impl TriggerContext {
    pub fn new(tz: Tz, first_fire_delay: TimeDelta) -> Self {
        Self {
            tz,
            first_fire_delay,
        }
    }

    pub fn from_config(cfg: &SchedulerConfig) -> Result<Self> {
        let delay = TimeDelta::try_seconds(cfg.first_fire_delay_secs as i64).ok_or_else(|| {
            SchedulerError::InvalidSpec("first fire delay out of range".to_string())
        })?;
        Ok(Self::new(cfg.tz()?, delay))
    }
}

/// A compiled, ready-to-evaluate trigger.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fires at `first`, `first + every`, `first + 2*every`, …
    Interval {
        every: TimeDelta,
        first: DateTime<Utc>,
    },
    Cron {
        expression: String,
        schedule: cron::Schedule,
        tz: Tz,
    },
}

impl Trigger {
    /// Compile a stored trigger. `now` anchors interval triggers.
    pub fn compile(spec: &TriggerSpec, ctx: &TriggerContext, now: DateTime<Utc>) -> Result<Self> {
        match spec {
            TriggerSpec::Interval { every_secs } => {
                if *every_secs == 0 {
                    return Err(SchedulerError::InvalidSpec(
                        "interval must be at least one second".to_string(),
                    ));
                }
                let every = i64::try_from(*every_secs)
                    .ok()
                    .and_then(TimeDelta::try_seconds)
                    .ok_or_else(|| {
                        SchedulerError::InvalidSpec(format!("interval {every_secs}s is too large"))
                    })?;
                Ok(Trigger::Interval {
                    every,
                    first: now + ctx.first_fire_delay,
                })
            }
            TriggerSpec::Cron { expression } => Ok(Trigger::Cron {
                expression: expression.trim().to_string(),
                schedule: compile_cron(expression)?,
                tz: ctx.tz,
            }),
        }
    }

    /// Soonest fire strictly after `t`, or `None` if the rule never fires
    /// again within the search horizon.
    pub fn next_fire_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Interval { every, first } => {
                if t < *first {
                    return Some(*first);
                }
                let step = every.num_milliseconds();
                let k = (t - *first).num_milliseconds() / step + 1;
                let offset = TimeDelta::try_milliseconds(step.checked_mul(k)?)?;
                first.checked_add_signed(offset)
            }
            Trigger::Cron { schedule, tz, .. } => {
                let next = schedule
                    .after(&t.with_timezone(tz))
                    .next()?
                    .with_timezone(&Utc);
                (next - t <= TimeDelta::days(SEARCH_HORIZON_DAYS)).then_some(next)
            }
        }
    }

    /// Collapse every fire due at or before `now`, starting from the job's
    /// pending fire `due`.
    ///
    /// Returns the latest fire time not after `now` and the first one after
    /// it.
    pub fn coalesce(
        &self,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> (DateTime<Utc>, Option<DateTime<Utc>>) {
        if due > now {
            return (due, Some(due));
        }
        match self {
            Trigger::Interval { every, first } => {
                let step = every.num_milliseconds();
                let k = (now - *first).num_milliseconds() / step;
                let latest = TimeDelta::try_milliseconds(step.saturating_mul(k))
                    .and_then(|d| first.checked_add_signed(d))
                    .map_or(due, |t| t.max(due));
                (latest, latest.checked_add_signed(*every))
            }
            Trigger::Cron { .. } => {
                let mut latest = due;
                let mut next = self.next_fire_after(due);
                let mut steps = 0;
                while let Some(n) = next {
                    if n > now {
                        break;
                    }
                    latest = n;
                    steps += 1;
                    if steps >= MAX_COALESCE_STEPS {
                        next = self.next_fire_after(now);
                        break;
                    }
                    next = self.next_fire_after(n);
                }
                (latest, next)
            }
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Interval { every, .. } => write!(f, "every {}s", every.num_seconds()),
            Trigger::Cron { expression, tz, .. } => write!(f, "cron '{expression}' ({tz})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Cron normalisation
// ---------------------------------------------------------------------------

fn invalid(expr: &str, reason: impl fmt::Display) -> SchedulerError {
    SchedulerError::InvalidSpec(format!("'{}': {reason}", expr.trim()))
}

/// Validate a 5-field crontab line and build the `cron` crate schedule.
fn compile_cron(expr: &str) -> Result<cron::Schedule> {
    let trimmed = expr.trim();
    if trimmed.starts_with('@') {
        return Err(invalid(expr, "macros like @daily are not supported"));
    }
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(invalid(
            expr,
            format!(
                "expected 5 fields (minute hour day month day-of-week), got {}",
                fields.len()
            ),
        ));
    }

    const LABELS: [&str; 5] = ["minute", "hour", "day-of-month", "month", "day-of-week"];
    for (i, field) in fields.iter().enumerate() {
        let names_allowed = i >= 3;
        let ok = field.chars().all(|c| {
            c.is_ascii_digit()
                || matches!(c, '*' | ',' | '/' | '-')
                || (names_allowed && c.is_ascii_alphabetic())
        });
        if !ok {
            return Err(invalid(
                expr,
                format!("unsupported characters in {} field '{field}'", LABELS[i]),
            ));
        }
    }

    let dow = expand_dow(fields[4]).map_err(|reason| invalid(expr, reason))?;
    let normalised = format!(
        "0 {} {} {} {} {dow}",
        fields[0], fields[1], fields[2], fields[3]
    );
    cron::Schedule::from_str(&normalised).map_err(|_| {
        // Parse each field on its own to name the one that was rejected.
        let reason = (0..4)
            .find(|&i| {
                let mut alone = ["*"; 4];
                alone[i] = fields[i];
                let line = format!("0 {} {} {} {} *", alone[0], alone[1], alone[2], alone[3]);
                cron::Schedule::from_str(&line).is_err()
            })
            .map(|i| format!("invalid {} field '{}'", LABELS[i], fields[i]))
            .unwrap_or_else(|| "fields do not form a valid schedule".to_string());
        invalid(expr, reason)
    })
}

fn dow_value(s: &str) -> std::result::Result<usize, String> {
    if let Ok(n) = s.parse::<usize>() {
        return if n <= 7 {
            Ok(n % 7)
        } else {
            Err(format!("day-of-week {n} out of range 0-7"))
        };
    }
    DOW_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(s))
        .ok_or_else(|| format!("unknown day-of-week '{s}'"))
}

/// Rewrite a day-of-week field as a list of day names (or `*` when every day
/// is selected). Numbers follow crontab: 0-6 from Sunday, 7 is Sunday again.
fn expand_dow(field: &str) -> std::result::Result<String, String> {
    let mut days = [false; 7];
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((r, s)) => {
                let step: usize = s
                    .parse()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| format!("invalid step '{s}'"))?;
                (r, Some(step))
            }
            None => (item, None),
        };

        let (lo, hi) = if range == "*" {
            (0, 6)
        } else if let Some((a, b)) = range.split_once('-') {
            let lo = dow_value(a)?;
            let mut hi = dow_value(b)?;
            // "Fri-Sun" / "5-7": Sunday closing a range counts as 7.
            if hi == 0 && lo > 0 {
                hi = 7;
            }
            if lo > hi {
                return Err(format!("reversed day-of-week range '{range}'"));
            }
            (lo, hi)
        } else if range.is_empty() {
            return Err("empty day-of-week item".to_string());
        } else {
            let v = dow_value(range)?;
            // "1/2" runs from Monday to the end of the week.
            if step.is_some() {
                (v, 6)
            } else {
                (v, v)
            }
        };

        for d in (lo..=hi).step_by(step.unwrap_or(1)) {
            days[d % 7] = true;
        }
    }

    if days.iter().all(|d| *d) {
        return Ok("*".to_string());
    }
    Ok(days
        .iter()
        .zip(DOW_NAMES)
        .filter(|(on, _)| **on)
        .map(|(_, name)| name)
        .collect::<Vec<_>>()
        .join(","))
}

// ---------------------------------------------------------------------------
// Human-readable preview
// ---------------------------------------------------------------------------

/// Result of `POST /api/cron/parse`.
#[derive(Debug, Clone, Serialize)]
pub struct CronPreview {
    pub valid: bool,
    pub description: String,
    /// `YYYY-MM-DD HH:MM:SS` in the scheduling timezone.
    pub next_run_time: Option<String>,
}

/// Format an instant for display in the scheduling timezone.
pub fn format_local(t: DateTime<Utc>, tz: Tz) -> String {
    t.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Describe `expression` in English and compute its next fire after `now`.
pub fn describe(expression: &str, tz: Tz, now: DateTime<Utc>) -> CronPreview {
    let expr = expression.trim();
    if expr.is_empty() {
        return CronPreview {
            valid: false,
            description: "No schedule set".to_string(),
            next_run_time: None,
        };
    }

    let schedule = match compile_cron(expr) {
        Ok(s) => s,
        Err(e) => {
            return CronPreview {
                valid: false,
                description: e.to_string(),
                next_run_time: None,
            }
        }
    };

    let trigger = Trigger::Cron {
        expression: expr.to_string(),
        schedule,
        tz,
    };
    let next_run_time = trigger.next_fire_after(now).map(|t| format_local(t, tz));
    let mut description = describe_fields(expr);
    if let Some(next) = &next_run_time {
        description.push_str(&format!(" (next run: {next})"));
    }

    CronPreview {
        valid: true,
        description,
        next_run_time,
    }
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn dow_label(days: &str) -> String {
    days.replace(',', ", ")
}

fn describe_fields(expr: &str) -> String {
    let f: Vec<&str> = expr.split_whitespace().collect();
    // Day names, or "*" when every day is selected.
    let days = expand_dow(f[4]).unwrap_or_else(|_| f[4].to_string());
    let (minute, hour, day, month, dow) = (f[0], f[1], f[2], f[3], days.as_str());

    if is_number(minute) && is_number(hour) && day == "*" && month == "*" {
        let at = format!("{hour:0>2}:{minute:0>2}");
        return if dow == "*" {
            format!("Every day at {at}")
        } else {
            format!("Every {} at {at}", dow_label(dow))
        };
    }
    if minute == "0" && hour == "0" && day != "*" && month == "*" && dow == "*" {
        return format!("At 00:00 on day {day} of every month");
    }

    let mut parts = Vec::new();
    parts.push(if minute == "*" {
        "Every minute".to_string()
    } else if let Some((start, n)) = minute.split_once('/') {
        if start == "*" || start == "0" {
            format!("Every {n} minutes")
        } else {
            format!("Every {n} minutes from minute {start}")
        }
    } else if minute.contains(',') || minute.contains('-') {
        format!("At minutes {minute}")
    } else {
        format!("At minute {minute}")
    });
    if hour != "*" {
        if let Some((_, n)) = hour.split_once('/') {
            parts.push(format!("every {n} hours"));
        } else if hour.contains(',') || hour.contains('-') {
            parts.push(format!("past hours {hour}"));
        } else {
            parts.push(format!("past hour {hour}"));
        }
    }
    if day != "*" {
        parts.push(format!("on day {day} of the month"));
    }
    if month != "*" {
        parts.push(format!("in month {month}"));
    }
    if dow != "*" {
        parts.push(format!("on {}", dow_label(dow)));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SHANGHAI: Tz = chrono_tz::Asia::Shanghai;

    fn ctx() -> TriggerContext {
        TriggerContext::new(SHANGHAI, TimeDelta::seconds(10))
    }

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        SHANGHAI
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn cron(expr: &str) -> Trigger {
        let spec = TriggerSpec::Cron {
            expression: expr.to_string(),
        };
        Trigger::compile(&spec, &ctx(), Utc::now()).unwrap()
    }

    fn rejects(expr: &str) {
        let spec = TriggerSpec::Cron {
            expression: expr.to_string(),
        };
        let err = Trigger::compile(&spec, &ctx(), Utc::now()).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSpec(_)), "{expr}: {err}");
    }

    #[test]
    fn daily_at_nine_local() {
        let next = cron("0 9 * * *").next_fire_after(local(2024, 1, 1, 8, 0));
        assert_eq!(next, Some(local(2024, 1, 1, 9, 0)));
    }

    #[test]
    fn quarter_hour_step() {
        let t = cron("*/15 * * * *");
        assert_eq!(
            t.next_fire_after(local(2024, 1, 1, 10, 7)),
            Some(local(2024, 1, 1, 10, 15))
        );
        // Strictly after: sitting on a fire time moves to the next one.
        assert_eq!(
            t.next_fire_after(local(2024, 1, 1, 10, 15)),
            Some(local(2024, 1, 1, 10, 30))
        );
    }

    #[test]
    fn malformed_expressions_rejected() {
        rejects("* * *");
        rejects("");
        rejects("0 0 9 * * *");
        rejects("0 0 9 * * * 2030");
        rejects("@daily");
        rejects("61 * * * *");
        rejects("0 25 * * *");
        rejects("0 9 ? * *");
        rejects("0 9 L * *");
        rejects("0 9 * * 8");
        rejects("0 9 * * Fri-Mon");
        rejects("0 9 * * */0");
    }

    #[test]
    fn sunday_is_zero_and_seven() {
        // 2024-01-01 is a Monday.
        let from = local(2024, 1, 1, 8, 0);
        let sunday = Some(local(2024, 1, 7, 9, 0));
        assert_eq!(cron("0 9 * * 0").next_fire_after(from), sunday);
        assert_eq!(cron("0 9 * * 7").next_fire_after(from), sunday);
        assert_eq!(cron("0 9 * * sun").next_fire_after(from), sunday);
    }

    #[test]
    fn dow_expansion() {
        assert_eq!(expand_dow("1-5").unwrap(), "Mon,Tue,Wed,Thu,Fri");
        assert_eq!(expand_dow("*/2").unwrap(), "Sun,Tue,Thu,Sat");
        assert_eq!(expand_dow("5-7").unwrap(), "Sun,Fri,Sat");
        assert_eq!(expand_dow("sat-sun").unwrap(), "Sun,Sat");
        assert_eq!(expand_dow("0-6").unwrap(), "*");
        assert_eq!(expand_dow("*").unwrap(), "*");
        assert!(expand_dow("1,,2").is_err());
    }

    #[test]
    fn weekdays_skip_weekend() {
        // Friday 2024-01-05 18:00 → Monday 09:00.
        let next = cron("0 9 * * 1-5").next_fire_after(local(2024, 1, 5, 18, 0));
        assert_eq!(next, Some(local(2024, 1, 8, 9, 0)));
    }

    #[test]
    fn day_of_month_and_weekday_both_apply() {
        // The 13th that falls on a Friday: September 2024.
        let next = cron("0 0 13 * 5").next_fire_after(local(2024, 1, 1, 0, 0));
        assert_eq!(next, Some(local(2024, 9, 13, 0, 0)));
    }

    #[test]
    fn impossible_date_never_fires() {
        assert_eq!(cron("0 0 30 2 *").next_fire_after(local(2024, 1, 1, 0, 0)), None);
    }

    #[test]
    fn interval_spacing_is_exact() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t = Trigger::compile(&TriggerSpec::Interval { every_secs: 60 }, &ctx(), now).unwrap();

        let first = t.next_fire_after(now).unwrap();
        assert_eq!(first, now + TimeDelta::seconds(10));
        let second = t.next_fire_after(first).unwrap();
        let third = t.next_fire_after(second).unwrap();
        assert_eq!(second - first, TimeDelta::seconds(60));
        assert_eq!(third - second, TimeDelta::seconds(60));
        // Midway between fires still lands on the grid.
        assert_eq!(t.next_fire_after(first + TimeDelta::seconds(7)), Some(second));
    }

    #[test]
    fn zero_interval_rejected() {
        let err = Trigger::compile(&TriggerSpec::Interval { every_secs: 0 }, &ctx(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSpec(_)));
    }

    #[test]
    fn coalesce_collapses_backlog() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t = Trigger::compile(&TriggerSpec::Interval { every_secs: 60 }, &ctx(), now).unwrap();
        let first = now + TimeDelta::seconds(10);

        // Five fires missed; the latest is the fifth, the next is the sixth.
        let late = first + TimeDelta::seconds(4 * 60 + 30);
        let (latest, next) = t.coalesce(first, late);
        assert_eq!(latest, first + TimeDelta::seconds(240));
        assert_eq!(next, Some(first + TimeDelta::seconds(300)));

        let c = cron("*/15 * * * *");
        let (latest, next) = c.coalesce(local(2024, 1, 1, 10, 0), local(2024, 1, 1, 10, 50));
        assert_eq!(latest, local(2024, 1, 1, 10, 45));
        assert_eq!(next, Some(local(2024, 1, 1, 11, 0)));
    }

    #[test]
    fn describe_daily() {
        let p = describe("30 9 * * *", SHANGHAI, local(2024, 1, 1, 8, 0));
        assert!(p.valid);
        assert_eq!(p.next_run_time.as_deref(), Some("2024-01-01 09:30:00"));
        assert_eq!(
            p.description,
            "Every day at 09:30 (next run: 2024-01-01 09:30:00)"
        );
    }

    #[test]
    fn describe_weekly_and_steps() {
        let now = local(2024, 1, 1, 8, 0);
        let p = describe("0 8 * * 1,3", SHANGHAI, now);
        assert!(p.description.starts_with("Every Mon, Wed at 08:00"));

        let p = describe("*/15 * * * *", SHANGHAI, now);
        assert!(p.description.starts_with("Every 15 minutes"));
    }

    #[test]
    fn describe_invalid() {
        let p = describe("", SHANGHAI, Utc::now());
        assert!(!p.valid);
        assert!(p.next_run_time.is_none());

        let p = describe("* * *", SHANGHAI, Utc::now());
        assert!(!p.valid);
        assert!(p.description.contains("expected 5 fields"));
    }

    #[test]
    fn describe_day_of_week_ranges_and_steps() {
        let now = local(2024, 1, 1, 8, 0);
        let p = describe("0 0 * * */7", SHANGHAI, now);
        assert!(p.description.starts_with("Every Sun at 00:00"), "{}", p.description);

        let p = describe("* * * * 0-0", SHANGHAI, now);
        assert!(p.description.starts_with("Every minute on Sun"), "{}", p.description);

        let p = describe("0 9 * * 0-7", SHANGHAI, now);
        assert!(p.description.starts_with("Every day at 09:00"), "{}", p.description);

        let p = describe("30 8 * * mon-fri", SHANGHAI, now);
        assert!(p.description.starts_with("Every Mon, Tue, Wed, Thu, Fri at 08:30"));
    }

    #[test]
    fn parser_errors_name_the_crontab_field() {
        let err = compile_cron("*/0 * * * *").unwrap_err().to_string();
        assert!(err.contains("invalid minute field '*/0'"), "{err}");
        assert!(!err.contains("0 */0"), "{err}");

        let p = describe("*/0 * * * *", SHANGHAI, Utc::now());
        assert!(!p.valid);
        assert!(p.description.contains("minute field"), "{}", p.description);
    }
}
