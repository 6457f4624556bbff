//! Platform configuration, log and kubeconfig locations

use std::path::{Path, PathBuf};

/// Application name used for platform directories
const APP_NAME: &str = "chainsaw";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/chainsaw/`
/// - macOS: `~/Library/Application Support/chainsaw/`
/// - Windows: `%APPDATA%\chainsaw\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

/// Locate the kubeconfig used when none is given on the command line
///
/// Honors the first entry of `$KUBECONFIG`, then `~/.kube/config`.
pub fn default_kubeconfig() -> Option<PathBuf> {
    if let Some(value) = std::env::var_os("KUBECONFIG") {
        if let Some(first) = std::env::split_paths(&value).find(|p| !p.as_os_str().is_empty()) {
            return Some(first);
        }
    }
    directories::UserDirs::new().map(|dirs| dirs.home_dir().join(".kube").join("config"))
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
    fn test_config_dir_is_valid() {
        let dir = config_dir();
        assert!(dir.is_some());
    }

    #[test]
    fn test_config_path_is_toml() {
        let path = config_path().unwrap();
        assert_eq!(path.file_name().unwrap(), "config.toml");
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let base = Path::new("/tests/basic");
        assert_eq!(
            resolve(base, Path::new("resources.yaml")),
            PathBuf::from("/tests/basic/resources.yaml")
        );
        assert_eq!(resolve(base, Path::new("/abs.yaml")), PathBuf::from("/abs.yaml"));
    }
}
