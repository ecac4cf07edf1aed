//! Platform paths for local state.
//!
//! Only the local control plane keeps state on disk; everything else is
//! re-queried from the control plane on every run.

use std::path::PathBuf;

use crate::consts::APP_NAME;

/// Environment variable overriding the local control plane state directory.
pub const STATE_DIR_ENV: &str = "STACKUP_STATE_DIR";

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var_os("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  std::env::var_os("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(home_dir)
    .join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Directory holding the local control plane's per-region state files.
///
/// `STACKUP_STATE_DIR` wins over the data directory.
pub fn control_plane_dir() -> PathBuf {
  match std::env::var_os(STATE_DIR_ENV) {
    Some(dir) if !dir.is_empty() => PathBuf::from(dir),
    _ => data_dir().join("control-plane"),
  }
}
