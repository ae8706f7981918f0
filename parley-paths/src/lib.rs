//! XDG Base Directory paths for parley.
//!
//! CLI tools should use XDG paths for cross-platform consistency,
//! not platform-native paths.

use std::path::PathBuf;

const APP: &str = "parley";

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    match std::env::var_os(var).filter(|value| !value.is_empty()) {
        Some(base) => PathBuf::from(base).join(APP),
        None => match dirs::home_dir() {
            Some(home) => home.join(fallback).join(APP),
            None => PathBuf::from(fallback).join(APP),
        },
    }
}

/// Get the parley config directory.
///
/// Returns `$XDG_CONFIG_HOME/parley` if set, otherwise `~/.config/parley`.
///
/// # Examples
///
/// ```
/// use parley_paths::config_dir;
///
/// let config = config_dir();
/// assert!(config.ends_with("parley"));
/// ```
pub fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

/// Get the parley data directory.
///
/// Returns `$XDG_DATA_HOME/parley` if set, otherwise `~/.local/share/parley`.
pub fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
}

/// User config file: `<config_dir>/config.toml`.
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Where saved chat sessions live by default.
pub fn sessions_dir() -> PathBuf {
    data_dir().join("sessions")
}
