//! Configuration, log and browser profile locations
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/pcf-debugger/`, `~/.local/share/pcf-debugger/`
//! - macOS: `~/Library/Application Support/pcf-debugger/`
//! - Windows: `%APPDATA%\pcf-debugger\`

use std::path::PathBuf;

const APP_NAME: &str = "pcf-debugger";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the user settings file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("logs"))
}

/// Browser profile directory used when the user configured none.
///
/// Keeping the debug browser in its own profile lets it run next to the
/// user's everyday Edge instance.
pub fn default_user_data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("browser-profile"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_is_toml() {
        if let Some(path) = config_path() {
            assert_eq!(path.file_name().unwrap(), "config.toml");
        }
    }

    #[test]
    fn test_profile_dir_is_under_data_dir() {
        if let (Some(profile), Some(logs)) = (default_user_data_dir(), log_dir()) {
            assert_eq!(profile.parent(), logs.parent());
        }
    }
}
