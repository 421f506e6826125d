use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{HeraldError, Result};

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_TIMEZONE: &str = "Asia/Shanghai";
pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_MISFIRE_GRACE_SECS: u64 = 30;
pub const DEFAULT_FIRST_FIRE_DELAY_SECS: u64 = 10;
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 300; // 5 minutes
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SEARCH_MODEL: &str = "gemini-2.5-flash";

/// Environment variables understood without the `HERALD_` prefix, and the
/// config key each one feeds.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("GEMINI_API_KEY", "search.api_key"),
    ("BARK_DEVICE_KEY", "notify.device_key"),
    ("BARK_API_SERVER", "notify.server"),
    ("DATA_RETENTION_DAYS", "retention.days"),
    ("SCHEDULER_TIMEZONE", "scheduler.timezone"),
    ("RSS_HOST", "feed.host"),
];

/// Top-level config (herald.toml + HERALD_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeraldConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Scheduling engine knobs. All cron evaluation happens in `timezone`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA zone name, e.g. "Asia/Shanghai". Never the host's local zone.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Size of the worker pool that runs fired jobs.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Fires later than this are dropped instead of run.
    #[serde(default = "default_misfire_grace")]
    pub misfire_grace_secs: u64,
    /// Delay before the first fire of an interval task.
    #[serde(default = "default_first_fire_delay")]
    pub first_fire_delay_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.to_string(),
            workers: DEFAULT_WORKERS,
            misfire_grace_secs: DEFAULT_MISFIRE_GRACE_SECS,
            first_fire_delay_secs: DEFAULT_FIRST_FIRE_DELAY_SECS,
        }
    }
}

impl SchedulerConfig {
    /// Resolve the configured zone name.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| HeraldError::UnknownTimezone(self.timezone.clone()))
    }
}

/// How script payloads are launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Interpreter binary; the payload is passed as its last argument.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_interpreter_args")]
    pub interpreter_args: Vec<String>,
    #[serde(default = "default_exec_timeout")]
    pub timeout_secs: u64,
    /// Cap per captured stream (stdout / stderr), in characters.
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    /// Host environment variables passed through to the child.
    #[serde(default = "default_env_allowlist")]
    pub env_allowlist: Vec<String>,
    /// Working directory for children. Defaults to the process cwd.
    pub workdir: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            interpreter_args: default_interpreter_args(),
            timeout_secs: DEFAULT_EXEC_TIMEOUT_SECS,
            max_output_chars: default_max_output_chars(),
            env_allowlist: default_env_allowlist(),
            workdir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_search_model")]
    pub model: String,
    #[serde(default = "default_search_base_url")]
    pub base_url: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_SEARCH_MODEL.to_string(),
            base_url: default_search_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub device_key: Option<String>,
    /// Bark server override; the official server is used when unset.
    pub server: Option<String>,
    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
    /// Push every new topic result to `device_key`.
    #[serde(default)]
    pub push_topic_results: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            device_key: None,
            server: None,
            timeout_secs: DEFAULT_NOTIFY_TIMEOUT_SECS,
            push_topic_results: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Feed results older than this many days are pruned.
    #[serde(default = "default_retention_days")]
    pub days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_host")]
    pub host: String,
    #[serde(default = "default_feed_title")]
    pub title: String,
    #[serde(default = "default_feed_description")]
    pub description: String,
    #[serde(default = "default_feed_window_days")]
    pub window_days: u32,
    #[serde(default = "default_feed_limit")]
    pub limit: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            host: default_feed_host(),
            title: default_feed_title(),
            description: default_feed_description(),
            window_days: default_feed_window_days(),
            limit: default_feed_limit(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.herald/herald.db", home)
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn default_workers() -> usize {
    DEFAULT_WORKERS
}
fn default_misfire_grace() -> u64 {
    DEFAULT_MISFIRE_GRACE_SECS
}
fn default_first_fire_delay() -> u64 {
    DEFAULT_FIRST_FIRE_DELAY_SECS
}
fn default_interpreter() -> String {
    "python3".to_string()
}
fn default_interpreter_args() -> Vec<String> {
    vec!["-c".to_string()]
}
fn default_exec_timeout() -> u64 {
    DEFAULT_EXEC_TIMEOUT_SECS
}
fn default_max_output_chars() -> usize {
    200_000
}
fn default_env_allowlist() -> Vec<String> {
    ["PATH", "HOME", "LANG", "GEMINI_API_KEY", "BARK_DEVICE_KEY", "BARK_API_SERVER"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_search_model() -> String {
    DEFAULT_SEARCH_MODEL.to_string()
}
fn default_search_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_notify_timeout() -> u64 {
    DEFAULT_NOTIFY_TIMEOUT_SECS
}
fn default_retention_days() -> u32 {
    2
}
fn default_feed_host() -> String {
    "http://localhost:5000".to_string()
}
fn default_feed_title() -> String {
    "Topic tracker".to_string()
}
fn default_feed_description() -> String {
    "AI-powered topic tracking feed".to_string()
}
fn default_feed_window_days() -> u32 {
    7
}
fn default_feed_limit() -> usize {
    50
}

impl HeraldConfig {
    /// Load config: built-in defaults, then the TOML file, then `HERALD_*`
    /// env vars (`__` separates nesting levels), then the unprefixed legacy
    /// variables in [`LEGACY_ENV`].
    ///
    /// The file is optional; a missing file simply contributes nothing.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: HeraldConfig = Self::figment(&path)
            .extract()
            .map_err(|e| HeraldError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(HeraldConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("HERALD_").split("__"))
            .merge(legacy_env())
    }

    /// Reject values that would only fail later, deep inside the engine.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.tz()?;
        if self.scheduler.workers == 0 {
            return Err(HeraldError::Config(
                "scheduler.workers must be at least 1".to_string(),
            ));
        }
        if self.runner.timeout_secs == 0 {
            return Err(HeraldError::Config(
                "runner.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.runner.interpreter.trim().is_empty() {
            return Err(HeraldError::Config(
                "runner.interpreter must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn legacy_env() -> Env {
    let names: Vec<&str> = LEGACY_ENV.iter().map(|(name, _)| *name).collect();
    Env::raw().only(&names).map(|key| {
        LEGACY_ENV
            .iter()
            .find(|(name, _)| key == *name)
            .map(|(_, target)| *target)
            .unwrap_or_else(|| key.as_str())
            .into()
    })
}

fn default_config_path() -> String {
    if let Ok(path) = std::env::var("HERALD_CONFIG") {
        return path;
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.herald/herald.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = HeraldConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scheduler.workers, 2);
        assert_eq!(config.scheduler.misfire_grace_secs, 30);
        assert_eq!(config.runner.timeout_secs, 300);
        assert_eq!(config.scheduler.tz().unwrap(), chrono_tz::Asia::Shanghai);
    }

    #[test]
    fn toml_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "herald.toml",
                r#"
                [gateway]
                port = 8080

                [scheduler]
                timezone = "Europe/Berlin"
                workers = 4
                "#,
            )?;
            jail.set_env("HERALD_SCHEDULER__WORKERS", "3");
            jail.set_env("GEMINI_API_KEY", "gk-test");
            jail.set_env("DATA_RETENTION_DAYS", "5");

            let config = HeraldConfig::load(Some("herald.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.gateway.port, 8080);
            assert_eq!(config.scheduler.timezone, "Europe/Berlin");
            assert_eq!(config.scheduler.workers, 3);
            assert_eq!(config.search.api_key.as_deref(), Some("gk-test"));
            assert_eq!(config.retention.days, 5);
            Ok(())
        });
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("herald.toml", "[scheduler]\ntimezone = \"Mars/Olympus\"\n")?;
            let err = HeraldConfig::load(Some("herald.toml")).unwrap_err();
            assert!(matches!(err, HeraldError::UnknownTimezone(_)));
            Ok(())
        });
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = HeraldConfig::default();
        config.scheduler.workers = 0;
        assert!(matches!(config.validate(), Err(HeraldError::Config(_))));
    }
}
