use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use herald_core::config::SearchConfig;

use crate::error::{Result, SearchError};
use crate::provider::SearchProvider;

/// Appended to every query so the feed gets prose rather than markdown.
const PLAIN_TEXT_SUFFIX: &str = "Answer in plain text, without any other formatting.";

/// Gemini `generateContent` with the Google-search grounding tool.
pub struct GeminiSearch {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl GeminiSearch {
    pub fn new(api_key: Option<String>, model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(cfg: &SearchConfig) -> Self {
        Self::new(cfg.api_key.clone(), cfg.model.clone(), cfg.base_url.clone())
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl SearchProvider for GeminiSearch {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn search(&self, query: &str) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or(SearchError::NotConfigured)?;
        let body = build_request_body(query);

        debug!(model = %self.model, query_len = query.len(), "sending grounded search");

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    SearchError::Unavailable(e.to_string())
                } else {
                    SearchError::Http(e)
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Gemini API error");
            return Err(SearchError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| SearchError::Parse(e.to_string()))?;

        extract_text(api_resp)
    }
}

fn build_request_body(query: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": format!("{query} {PLAIN_TEXT_SUFFIX}") }]
        }],
        "tools": [{ "google_search": {} }]
    })
}

/// Concatenate the text parts of the first candidate.
fn extract_text(resp: ApiResponse) -> Result<String> {
    let text: String = resp
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        Err(SearchError::NoContent)
    } else {
        Ok(text)
    }
}

// Gemini API response types

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<String> {
        extract_text(serde_json::from_str(raw).unwrap())
    }

    #[test]
    fn request_enables_grounding() {
        let body = build_request_body("latest tokio release");
        assert_eq!(body["tools"][0]["google_search"], json!({}));
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.starts_with("latest tokio release "));
        assert!(prompt.ends_with(PLAIN_TEXT_SUFFIX));
    }

    #[test]
    fn joins_text_parts() {
        let raw = r#"{
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{"text": "Tokio 1.47 "}, {"text": "was released."}]
                },
                "finishReason": "STOP",
                "groundingMetadata": {"webSearchQueries": ["tokio release"]}
            }],
            "usageMetadata": {"totalTokenCount": 42}
        }"#;
        assert_eq!(parse(raw).unwrap(), "Tokio 1.47 was released.");
    }

    #[test]
    fn blocked_or_empty_is_no_content() {
        let blocked = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        assert!(matches!(parse(blocked), Err(SearchError::NoContent)));

        let no_parts = r#"{"candidates": [{"finishReason": "MAX_TOKENS"}]}"#;
        assert!(matches!(parse(no_parts), Err(SearchError::NoContent)));
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let g = GeminiSearch::new(Some("k".into()), "gemini-2.5-flash", "https://example.test/");
        assert_eq!(
            g.endpoint(),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let g = GeminiSearch::new(Some("  ".into()), "m", "http://127.0.0.1:9");
        assert!(!g.is_configured());
        assert!(matches!(g.search("q").await, Err(SearchError::NotConfigured)));
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        // Port 9 (discard) is closed on test hosts; connect fails immediately.
        let g = GeminiSearch::new(Some("k".into()), "m", "http://127.0.0.1:9");
        assert!(matches!(g.search("q").await, Err(SearchError::Unavailable(_))));
    }
}
