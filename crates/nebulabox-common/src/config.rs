//! Configuration model for the NebulaBox lifecycle core.
//!
//! The config is built once by the caller and passed down explicitly;
//! nothing in the workspace reads it from a global.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{NebulaboxError, Result};

/// What the lifecycle manager does when a second operation targets a busy
/// container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyMode {
    /// Wait behind the in-flight operation, first come first served.
    #[default]
    Queue,
    /// Fail immediately with `ConcurrentOperationInProgress`.
    Reject,
}

/// Root configuration for NebulaBox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NebulaboxConfig {
    /// Base directory for NebulaBox state and data.
    pub data_dir: PathBuf,
    /// State index of the local runtime backend. Relative paths resolve
    /// against `data_dir`.
    pub state_file: PathBuf,
    /// Deadline for each runtime client call in seconds; `0` disables it.
    pub operation_timeout_secs: u64,
    /// Polling interval when following logs from the local backend.
    pub log_poll_interval_ms: u64,
    /// Capacity of each log stream channel.
    pub log_buffer: usize,
    /// Behaviour when an operation targets a busy container.
    pub concurrency: ConcurrencyMode,
}

impl Default for NebulaboxConfig {
    fn default() -> Self {
        Self {
            data_dir: constants::default_data_dir(),
            state_file: PathBuf::from(constants::STATE_FILE_NAME),
            operation_timeout_secs: constants::DEFAULT_OPERATION_TIMEOUT_SECS,
            log_poll_interval_ms: constants::DEFAULT_LOG_POLL_INTERVAL_MS,
            log_buffer: constants::DEFAULT_LOG_BUFFER,
            concurrency: ConcurrencyMode::default(),
        }
    }
}

impl NebulaboxConfig {
    /// Reads a YAML configuration file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid YAML, or
    /// holds inconsistent values.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| NebulaboxError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| NebulaboxError::Config {
            message: format!("{}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `explicit` if given, otherwise `$HOME/.nebulabox.yaml` when it
    /// exists, otherwise the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file is missing or any
    /// chosen file fails to load.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match constants::default_config_file() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::Config`] for a zero log buffer or poll
    /// interval.
    pub fn validate(&self) -> Result<()> {
        if self.log_buffer == 0 {
            return Err(NebulaboxError::Config {
                message: "log_buffer must be at least 1".into(),
            });
        }
        if self.log_poll_interval_ms == 0 {
            return Err(NebulaboxError::Config {
                message: "log_poll_interval_ms must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Returns the state file path, resolved against the data directory.
    #[must_use]
    pub fn state_file_path(&self) -> PathBuf {
        if self.state_file.is_absolute() {
            self.state_file.clone()
        } else {
            self.data_dir.join(&self.state_file)
        }
    }

    /// Returns the per-call runtime deadline, if one is configured.
    #[must_use]
    pub const fn operation_timeout(&self) -> Option<Duration> {
        if self.operation_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.operation_timeout_secs))
        }
    }

    /// Returns the log follow polling interval.
    #[must_use]
    pub const fn log_poll_interval(&self) -> Duration {
        Duration::from_millis(self.log_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = NebulaboxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency, ConcurrencyMode::Queue);
        assert_eq!(config.operation_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn relative_state_file_resolves_under_data_dir() {
        let config = NebulaboxConfig {
            data_dir: PathBuf::from("/tmp/nb"),
            ..NebulaboxConfig::default()
        };
        assert_eq!(config.state_file_path(), PathBuf::from("/tmp/nb/state.json"));
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let config = NebulaboxConfig {
            operation_timeout_secs: 0,
            ..NebulaboxConfig::default()
        };
        assert!(config.operation_timeout().is_none());
    }

    #[test]
    fn load_partial_yaml_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nebulabox.yaml");
        std::fs::write(&path, "operation_timeout_secs: 5\nconcurrency: reject\n").expect("write");

        let config = NebulaboxConfig::load(&path).expect("load");
        assert_eq!(config.operation_timeout_secs, 5);
        assert_eq!(config.concurrency, ConcurrencyMode::Reject);
        assert_eq!(config.log_buffer, constants::DEFAULT_LOG_BUFFER);
    }

    #[test]
    fn load_rejects_zero_buffer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nebulabox.yaml");
        std::fs::write(&path, "log_buffer: 0\n").expect("write");

        assert!(matches!(
            NebulaboxConfig::load(&path),
            Err(NebulaboxError::Config { .. })
        ));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.yaml");
        assert!(matches!(
            NebulaboxConfig::load_or_default(Some(&missing)),
            Err(NebulaboxError::Io { .. })
        ));
    }
}
