//! Debug logging to a file
//!
//! The host owns stdout and shows stderr to the user, so diagnostics go to
//! a log file in the data directory. Logging is off unless a filter is set:
//!
//! 1. `RECURRENCE_LOG` holds an `EnvFilter` directive
//! 2. `DEBUG_RECURRENCE=1` turns on debug output
//! 3. `log_filter` in the config file

use recur_engine::RecurrenceConfig;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a filter directive
pub const LOG_ENV: &str = "RECURRENCE_LOG";

/// Environment switch for debug output
pub const DEBUG_ENV: &str = "DEBUG_RECURRENCE";

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("cannot open log file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid log filter '{directive}': {message}")]
    Filter { directive: String, message: String },

    #[error("logger already installed")]
    AlreadyInstalled,
}

/// Filter directive to use, given the environment values and config
#[must_use]
pub fn filter_directive(
    log_env: Option<String>,
    debug_env: Option<String>,
    config: &RecurrenceConfig,
) -> Option<String> {
    if let Some(directive) = log_env.filter(|d| !d.trim().is_empty()) {
        return Some(directive);
    }
    if debug_env.is_some_and(|v| matches!(v.trim(), "1" | "true" | "yes")) {
        return Some("debug".to_string());
    }
    config.log_filter.clone()
}

/// Install the file logger when a filter is configured
///
/// Returns the log path when logging was turned on.
///
/// # Errors
/// Returns [`LogError`] if the file or filter is unusable.
pub fn init(config: &RecurrenceConfig, data_dir: &Path) -> Result<Option<PathBuf>, LogError> {
    let directive = filter_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var(DEBUG_ENV).ok(),
        config,
    );
    let Some(directive) = directive else {
        return Ok(None);
    };

    let filter = EnvFilter::try_new(&directive).map_err(|e| LogError::Filter {
        directive: directive.clone(),
        message: e.to_string(),
    })?;

    let path = config.log_path(data_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| LogError::Open {
            path: path.clone(),
            source,
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| LogError::Open {
            path: path.clone(),
            source,
        })?;

    tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_env_filter(filter)
        .try_init()
        .map_err(|_| LogError::AlreadyInstalled)?;

    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_precedence() {
        let config = RecurrenceConfig::default().with_log_filter("recur_engine=info");
        assert_eq!(
            filter_directive(Some("trace".into()), Some("1".into()), &config).as_deref(),
            Some("trace")
        );
        assert_eq!(
            filter_directive(None, Some("1".into()), &config).as_deref(),
            Some("debug")
        );
        assert_eq!(
            filter_directive(Some("  ".into()), Some("0".into()), &config).as_deref(),
            Some("recur_engine=info")
        );
        assert_eq!(filter_directive(None, None, &RecurrenceConfig::default()), None);
    }
}
