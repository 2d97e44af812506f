//! System-wide constants and default paths.

use std::path::PathBuf;

/// Fallback data directory when no home directory can be determined.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/nebulabox";

/// Name of the per-user data directory created under `$HOME`.
pub const USER_DATA_DIR_NAME: &str = ".nebulabox";

/// File name of the per-user configuration file under `$HOME`.
pub const USER_CONFIG_FILE_NAME: &str = ".nebulabox.yaml";

/// File name of the local runtime state index inside the data directory.
pub const STATE_FILE_NAME: &str = "state.json";

/// Default deadline applied to each runtime client call, in seconds.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 120;

/// Default polling interval used when following logs from the local backend.
pub const DEFAULT_LOG_POLL_INTERVAL_MS: u64 = 250;

/// Default capacity of a log stream channel.
pub const DEFAULT_LOG_BUFFER: usize = 256;

/// Capacity of the lifecycle event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Number of id characters used in default names and short listings.
pub const SHORT_ID_LENGTH: usize = 8;

/// Application name used in CLI output and state files.
pub const APP_NAME: &str = "nebulabox";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "nebulabox";

/// Returns the user's home directory, if the environment names one.
#[must_use]
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// Returns the default data directory: `$HOME/.nebulabox`, falling back to
/// [`SYSTEM_DATA_DIR`] when no home directory is available.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    home_dir().map_or_else(
        || PathBuf::from(SYSTEM_DATA_DIR),
        |home| home.join(USER_DATA_DIR_NAME),
    )
}

/// Returns the implicit configuration file path (`$HOME/.nebulabox.yaml`).
#[must_use]
pub fn default_config_file() -> Option<PathBuf> {
    home_dir().map(|home| home.join(USER_CONFIG_FILE_NAME))
}
