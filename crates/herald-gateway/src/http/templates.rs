use axum::Json;
use serde::Serialize;

/// A starting point offered by the task editor.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub code: &'static str,
}

const TEMPLATES: &[ScriptTemplate] = &[
    ScriptTemplate {
        name: "Simple test script",
        description: "Prints the time and environment; handy for checking the runner",
        code: r#"import os
from datetime import datetime

print(f"Run at {datetime.now():%Y-%m-%d %H:%M:%S}")
print(f"Search key configured: {bool(os.environ.get('GEMINI_API_KEY'))}")
print(f"Push key configured: {bool(os.environ.get('BARK_DEVICE_KEY'))}")
"#,
    },
    ScriptTemplate {
        name: "Push notification",
        description: "Sends a Bark push using the configured device key",
        code: r#"import json
import os
import urllib.request

server = os.environ.get("BARK_API_SERVER", "https://api.day.app").rstrip("/")
payload = {
    "device_key": os.environ["BARK_DEVICE_KEY"],
    "title": "Herald",
    "body": "Scheduled reminder",
    "group": "herald",
}
req = urllib.request.Request(
    f"{server}/push",
    data=json.dumps(payload).encode(),
    headers={"Content-Type": "application/json; charset=utf-8"},
)
with urllib.request.urlopen(req, timeout=10) as resp:
    print(resp.read().decode())
"#,
    },
    ScriptTemplate {
        name: "AI search and push",
        description: "Asks Gemini with Google-search grounding and pushes the answer",
        code: r#"import json
import os
import urllib.request

query = "Today's most important AI news"

body = {
    "contents": [{"role": "user", "parts": [{"text": query}]}],
    "tools": [{"google_search": {}}],
}
req = urllib.request.Request(
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent",
    data=json.dumps(body).encode(),
    headers={
        "Content-Type": "application/json",
        "x-goog-api-key": os.environ["GEMINI_API_KEY"],
    },
)
with urllib.request.urlopen(req, timeout=60) as resp:
    answer = json.load(resp)
text = "".join(
    p.get("text", "") for p in answer["candidates"][0]["content"]["parts"]
)
print(text)

server = os.environ.get("BARK_API_SERVER", "https://api.day.app").rstrip("/")
push = {
    "device_key": os.environ["BARK_DEVICE_KEY"],
    "title": f"AI search: {query[:20]}",
    "body": text[:1000],
    "group": "AI search",
}
urllib.request.urlopen(
    urllib.request.Request(
        f"{server}/push",
        data=json.dumps(push).encode(),
        headers={"Content-Type": "application/json; charset=utf-8"},
    ),
    timeout=10,
)
"#,
    },
    ScriptTemplate {
        name: "HTTP health check",
        description: "Fails the run when a URL does not answer with 200",
        code: r#"import sys
import urllib.request

url = "https://example.com/"
try:
    with urllib.request.urlopen(url, timeout=15) as resp:
        print(f"{url} -> {resp.status}")
        sys.exit(0 if resp.status == 200 else 1)
except Exception as e:
    print(f"{url} unreachable: {e}", file=sys.stderr)
    sys.exit(1)
"#,
    },
];

/// GET /api/templates
pub async fn list_templates() -> Json<&'static [ScriptTemplate]> {
    Json(TEMPLATES)
}

#[cfg(test)]
mod tests {
    use crate::app::test_support::{send_json, state};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn templates_are_listed() {
        let st = state();
        let (status, body) = send_json(&st, "GET", "/api/templates", None).await;
        assert_eq!(status, StatusCode::OK);
        let list = body.as_array().unwrap();
        assert_eq!(list.len(), 4);
        assert!(list.iter().all(|t| !t["code"].as_str().unwrap().is_empty()));
    }
}
