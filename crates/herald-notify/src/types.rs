use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Interruption level (iOS 15+).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Level {
    Active,
    TimeSensitive,
    Passive,
}

/// One push message. Only `body` is required; unset fields are omitted from
/// the wire payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Notification {
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    /// HTTPS URL of a custom icon.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Opened when the notification is tapped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Copied to the clipboard when the notification is tapped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copy: Option<String>,
    /// Store silently in history instead of alerting.
    #[serde(
        rename = "isArchive",
        skip_serializing_if = "is_false",
        serialize_with = "archive_flag"
    )]
    pub is_archive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

// The push API expects the string "1", not a JSON boolean.
fn archive_flag<S: Serializer>(_: &bool, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str("1")
}

impl Notification {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn sound(mut self, sound: impl Into<String>) -> Self {
        self.sound = Some(sound.into());
        self
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    pub fn archived(mut self) -> Self {
        self.is_archive = true;
        self
    }
}

/// Result of a delivery attempt: the service's decoded reply on success, an
/// `{"error": ...}` object otherwise.
#[derive(Debug, Clone, Serialize)]
pub struct NotifyOutcome {
    pub success: bool,
    pub response: Value,
}

impl NotifyOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            response: serde_json::json!({ "error": error.into() }),
        }
    }
}
