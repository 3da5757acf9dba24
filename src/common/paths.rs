//! Configuration and data file locations

use std::path::{Path, PathBuf};

/// Name used for the per-user directories
const APP_NAME: &str = "workflow-tester";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/workflow-tester/`
/// - macOS: `~/Library/Application Support/workflow-tester/`
/// - Windows: `%APPDATA%\workflow-tester\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the user settings file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Resolve `path` against `base` unless it is already absolute
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative() {
        let resolved = resolve(Path::new("/data/suite"), Path::new("inputs/a.txt"));
        assert_eq!(resolved, PathBuf::from("/data/suite/inputs/a.txt"));
    }

    #[test]
    fn test_resolve_absolute_is_untouched() {
        let resolved = resolve(Path::new("/data/suite"), Path::new("/tmp/a.txt"));
        assert_eq!(resolved, PathBuf::from("/tmp/a.txt"));
    }

    #[test]
    fn test_config_path_is_toml() {
        if let Some(path) = config_path() {
            assert!(path.ends_with("config.toml"));
        }
    }
}
