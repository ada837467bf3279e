use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_LOG_FILTER: &str = "resultsd=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Process-level settings, read once from the environment at start-up.
/// Workspace-level settings live in the `settings` table instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
    pub log_format: LogFormat,
    pub busy_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_format: LogFormat::Compact,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let workspace = non_empty("RESULTSD_WORKSPACE").map(PathBuf::from);
        let log_filter = non_empty("RESULTSD_LOG")
            .or_else(|| non_empty("RUST_LOG"))
            .unwrap_or(defaults.log_filter);
        let log_format = match non_empty("RESULTSD_LOG_FORMAT") {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };
        // Unparseable values fall back to the default rather than aborting start-up.
        let busy_timeout = non_empty("RESULTSD_BUSY_TIMEOUT_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.busy_timeout);

        Self {
            workspace,
            log_filter,
            log_format,
            busy_timeout,
        }
    }
}
