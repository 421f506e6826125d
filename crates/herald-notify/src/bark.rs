use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use herald_core::config::NotifyConfig;

use crate::types::{Notification, NotifyOutcome};
use crate::Notifier;

pub const DEFAULT_SERVER: &str = "https://api.day.app";

/// Bark push client (`POST {server}/push`).
pub struct BarkNotifier {
    client: reqwest::Client,
    push_url: String,
}

#[derive(Serialize)]
struct Payload<'a> {
    device_key: &'a str,
    #[serde(flatten)]
    notification: &'a Notification,
}

impl BarkNotifier {
    pub fn new(server: Option<&str>, timeout: Duration) -> Self {
        let server = server
            .map(|s| s.trim().trim_end_matches('/'))
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SERVER);
        // Builder only fails on TLS backend init; fall back to defaults then.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            push_url: format!("{server}/push"),
        }
    }

    pub fn from_config(cfg: &NotifyConfig) -> Self {
        Self::new(cfg.server.as_deref(), Duration::from_secs(cfg.timeout_secs))
    }

    pub fn push_url(&self) -> &str {
        &self.push_url
    }
}

#[async_trait]
impl Notifier for BarkNotifier {
    fn name(&self) -> &str {
        "bark"
    }

    async fn send(&self, target_key: &str, notification: &Notification) -> NotifyOutcome {
        let payload = Payload {
            device_key: target_key,
            notification,
        };
        let title = notification.title.as_deref().unwrap_or("");
        debug!(url = %self.push_url, title, "sending push");

        let resp = match self.client.post(&self.push_url).json(&payload).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                error!(url = %self.push_url, title, "push request timed out");
                return NotifyOutcome::failed(format!("request to {} timed out", self.push_url));
            }
            Err(e) => {
                error!(url = %self.push_url, title, error = %e, "push request failed");
                return NotifyOutcome::failed(e.to_string());
            }
        };

        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        let outcome = evaluate(status, &text);
        if outcome.success {
            let message_id = outcome.response.get("messageid").cloned().unwrap_or_default();
            info!(title, message_id = %message_id, "push delivered");
        } else {
            error!(status, title, response = %outcome.response, "push rejected");
        }
        outcome
    }
}

/// Delivered iff HTTP 200 and the body's own `code` is 200.
fn evaluate(status: u16, body: &str) -> NotifyOutcome {
    match serde_json::from_str::<Value>(body) {
        Ok(v) => NotifyOutcome {
            success: status == 200 && v.get("code").and_then(Value::as_i64) == Some(200),
            response: v,
        },
        Err(e) => NotifyOutcome {
            success: false,
            response: json!({ "error": format!("invalid JSON response: {e}"), "response_text": body }),
        },
    }
}
