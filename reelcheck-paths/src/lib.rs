//! XDG Base Directory paths for reelcheck.
//!
//! Config lives under `$XDG_CONFIG_HOME/reelcheck`, evaluation data and the
//! cost ledger under `$XDG_DATA_HOME/reelcheck`. Platform-native locations are
//! not used so the layout is the same on every host.

use std::path::PathBuf;

const APP_DIR: &str = "reelcheck";

/// File name of the append-only cost ledger inside [`data_dir`].
pub const COST_LEDGER_FILE: &str = "cost_log.jsonl";

/// Get the reelcheck config directory.
///
/// Returns `$XDG_CONFIG_HOME/reelcheck` if set, otherwise `~/.config/reelcheck`.
///
/// # Examples
///
/// ```
/// use reelcheck_paths::config_dir;
///
/// let config = config_dir();
/// let file = config.join("config.toml");
/// ```
pub fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

/// Get the reelcheck data directory.
///
/// Returns `$XDG_DATA_HOME/reelcheck` if set, otherwise `~/.local/share/reelcheck`.
/// Video asset directories are looked up under `videos/` here unless the
/// caller points somewhere else.
pub fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
}

/// Default location of video asset directories.
pub fn videos_dir() -> PathBuf {
    data_dir().join("videos")
}

/// Default location of the cost ledger.
pub fn cost_ledger_path() -> PathBuf {
    data_dir().join(COST_LEDGER_FILE)
}

/// Default directory searched for named rubric files.
pub fn rubrics_dir() -> PathBuf {
    config_dir().join("rubrics")
}

fn xdg_dir(var: &str, home_relative: &str) -> PathBuf {
    if let Ok(base) = std::env::var(var)
        && !base.is_empty()
    {
        PathBuf::from(base).join(APP_DIR)
    } else if let Some(home) = dirs::home_dir() {
        home.join(home_relative).join(APP_DIR)
    } else {
        PathBuf::from(home_relative).join(APP_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn config_dir_ends_with_app_name() {
        assert!(config_dir().ends_with("reelcheck"));
    }

    #[test]
    #[serial]
    fn config_dir_respects_xdg_env() {
        unsafe {
            std::env::set_var("XDG_CONFIG_HOME", "/tmp/test-config");
        }
        let path = config_dir();
        assert_eq!(path, PathBuf::from("/tmp/test-config/reelcheck"));
        assert_eq!(
            rubrics_dir(),
            PathBuf::from("/tmp/test-config/reelcheck/rubrics")
        );
        unsafe {
            std::env::remove_var("XDG_CONFIG_HOME");
        }
    }

    #[test]
    #[serial]
    fn data_dir_respects_xdg_env() {
        unsafe {
            std::env::set_var("XDG_DATA_HOME", "/tmp/test-data");
        }
        assert_eq!(data_dir(), PathBuf::from("/tmp/test-data/reelcheck"));
        assert_eq!(
            cost_ledger_path(),
            PathBuf::from("/tmp/test-data/reelcheck/cost_log.jsonl")
        );
        assert_eq!(videos_dir(), PathBuf::from("/tmp/test-data/reelcheck/videos"));
        unsafe {
            std::env::remove_var("XDG_DATA_HOME");
        }
    }

    #[test]
    #[serial]
    fn empty_xdg_value_falls_back_to_home() {
        unsafe {
            std::env::set_var("XDG_DATA_HOME", "");
        }
        let path = data_dir();
        assert!(path.ends_with(".local/share/reelcheck"));
        unsafe {
            std::env::remove_var("XDG_DATA_HOME");
        }
    }
}
