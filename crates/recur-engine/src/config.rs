//! Engine configuration
//!
//! Loaded from TOML. Every key is optional:
//!
//! ```toml
//! task_binary = "task"
//! channel_file = "/home/me/.task/recurrence_propagation.json"
//! log_file = "/home/me/.task/recurrence_debug.log"
//! log_filter = "recur_engine=debug"
//! suppress_host_hooks = true
//! origin_tag = "recurrence"
//! ```

use crate::error::ConfigError;
use crate::store::Origin;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "RECURRENCE_CONFIG";

/// Config file name inside the data directory
pub const CONFIG_FILE_NAME: &str = "recurrence.toml";

/// Default channel file name inside the data directory
pub const CHANNEL_FILE_NAME: &str = "recurrence_propagation.json";

/// Default log file name inside the data directory
pub const LOG_FILE_NAME: &str = "recurrence_debug.log";

/// Recurrence configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecurrenceConfig {
    /// Host command used by the store adapter
    pub task_binary: String,
    /// Propagation channel location; defaults into the data directory
    pub channel_file: Option<PathBuf>,
    /// Debug log location; defaults into the data directory
    pub log_file: Option<PathBuf>,
    /// `tracing` filter directive; logging is off when unset
    pub log_filter: Option<String>,
    /// Turn engine mutations into hook-free host commands
    pub suppress_host_hooks: bool,
    /// Tag carried by engine mutations when host hooks stay on
    pub origin_tag: String,
}

impl RecurrenceConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With host binary
    #[inline]
    #[must_use]
    pub fn with_task_binary(mut self, binary: impl Into<String>) -> Self {
        self.task_binary = binary.into();
        self
    }

    /// With channel file
    #[inline]
    #[must_use]
    pub fn with_channel_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.channel_file = Some(path.into());
        self
    }

    /// With log filter
    #[inline]
    #[must_use]
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// With hook suppression
    #[inline]
    #[must_use]
    pub fn with_suppress_host_hooks(mut self, suppress: bool) -> Self {
        self.suppress_host_hooks = suppress;
        self
    }

    /// With origin tag
    #[inline]
    #[must_use]
    pub fn with_origin_tag(mut self, tag: impl Into<String>) -> Self {
        self.origin_tag = tag.into();
        self
    }

    /// Mark for engine-issued mutations
    #[must_use]
    pub fn origin(&self) -> Origin {
        Origin::new(self.origin_tag.clone())
    }

    /// Channel location, resolved against the data directory
    #[must_use]
    pub fn channel_path(&self, data_dir: &Path) -> PathBuf {
        self.channel_file
            .clone()
            .unwrap_or_else(|| data_dir.join(CHANNEL_FILE_NAME))
    }

    /// Log location, resolved against the data directory
    #[must_use]
    pub fn log_path(&self, data_dir: &Path) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| data_dir.join(LOG_FILE_NAME))
    }

    /// Parse TOML text; `source` is only used in error messages
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] for invalid TOML or unknown keys.
    pub fn from_toml_str(text: &str, source: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: source.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load a config file
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Which file to load: an explicit override, else the data directory's
    /// config if it exists, else none (defaults)
    #[must_use]
    pub fn locate(explicit: Option<PathBuf>, data_dir: &Path) -> Option<PathBuf> {
        if explicit.is_some() {
            return explicit;
        }
        let candidate = data_dir.join(CONFIG_FILE_NAME);
        candidate.is_file().then_some(candidate)
    }

    /// Locate and load, falling back to defaults when no file exists
    ///
    /// # Errors
    /// Returns [`ConfigError`] if a located file cannot be read or parsed.
    pub fn discover(explicit: Option<PathBuf>, data_dir: &Path) -> Result<Self, ConfigError> {
        match Self::locate(explicit, data_dir) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading recurrence config");
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }
}

impl Default for RecurrenceConfig {
    fn default() -> Self {
        Self {
            task_binary: "task".to_string(),
            channel_file: None,
            log_file: None,
            log_filter: None,
            suppress_host_hooks: true,
            origin_tag: "recurrence".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let config = RecurrenceConfig::default();
        assert_eq!(config.task_binary, "task");
        assert!(config.suppress_host_hooks);
        assert_eq!(config.origin().tag, "recurrence");
        assert_eq!(
            config.channel_path(Path::new("/data")),
            Path::new("/data/recurrence_propagation.json")
        );
        assert_eq!(
            config.log_path(Path::new("/data")),
            Path::new("/data/recurrence_debug.log")
        );
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RecurrenceConfig::from_toml_str(
            "origin_tag = \"rec\"\nsuppress_host_hooks = false\n",
            Path::new("inline"),
        )
        .unwrap();
        assert_eq!(config.origin_tag, "rec");
        assert!(!config.suppress_host_hooks);
        assert_eq!(config.task_binary, "task");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = RecurrenceConfig::from_toml_str("colour = \"blue\"", Path::new("inline"));
        assert!(matches!(err, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn discovery_prefers_explicit_then_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(RecurrenceConfig::locate(None, dir.path()), None);
        assert_eq!(
            RecurrenceConfig::discover(None, dir.path()).unwrap(),
            RecurrenceConfig::default()
        );

        let in_data = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&in_data, "task_binary = \"/usr/bin/task\"\n").unwrap();
        assert_eq!(RecurrenceConfig::locate(None, dir.path()), Some(in_data));
        assert_eq!(
            RecurrenceConfig::discover(None, dir.path()).unwrap().task_binary,
            "/usr/bin/task"
        );

        let explicit = dir.path().join("other.toml");
        std::fs::write(&explicit, "origin_tag = \"x\"\n").unwrap();
        let loaded = RecurrenceConfig::discover(Some(explicit), dir.path()).unwrap();
        assert_eq!(loaded.origin_tag, "x");
        assert_eq!(loaded.task_binary, "task");
    }
}
