use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::Deserialize;

pub const APP_DIR: &str = "orgtree-mcp";
pub const CONFIG_FILE: &str = "config.json";

/// Server configuration. Layered as defaults, then `config.json` in the
/// config directory, then `ORGTREE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Directory holding one JSON record per stored tree.
    pub data_dir: PathBuf,
    /// Indent report output unless a request says otherwise.
    pub pretty_reports: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: config_dir().join("trees"),
            pretty_reports: false,
        }
    }
}

/// `$XDG_CONFIG_HOME/orgtree-mcp`, `~/.config/orgtree-mcp`, or a tmp fallback.
pub fn config_dir() -> PathBuf {
    if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(config).join(APP_DIR)
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".config").join(APP_DIR)
    } else {
        std::env::temp_dir().join(APP_DIR)
    }
}

impl Config {
    pub fn load() -> Self {
        let mut config = Self::from_file(&config_dir().join(CONFIG_FILE));
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Falls back to defaults when the file is absent or unreadable.
    pub fn from_file(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => {
                debug!("no config file at {}, using defaults", path.display());
                return Self::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!("ignoring invalid config {}: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("ORGTREE_DATA_DIR").filter(|d| !d.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(flag) = var("ORGTREE_PRETTY_REPORTS") {
            match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.pretty_reports = true,
                "0" | "false" | "no" | "off" => self.pretty_reports = false,
                other => warn!("ignoring ORGTREE_PRETTY_REPORTS={other}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{ "dataDir": "/srv/trees", "prettyReports": true }"#).unwrap();
        let config = Config::from_file(&path);
        assert_eq!(config.data_dir, PathBuf::from("/srv/trees"));
        assert!(config.pretty_reports);
    }

    #[test]
    fn test_partial_and_missing_files_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{ "prettyReports": true }"#).unwrap();
        let config = Config::from_file(&path);
        assert!(config.pretty_reports);
        assert_eq!(config.data_dir, Config::default().data_dir);

        assert_eq!(Config::from_file(&dir.path().join("absent.json")), Config::default());

        std::fs::write(&path, "not json").unwrap();
        assert_eq!(Config::from_file(&path), Config::default());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "ORGTREE_DATA_DIR" => Some("/var/lib/orgtree".into()),
            "ORGTREE_PRETTY_REPORTS" => Some("Yes".into()),
            _ => None,
        });
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/orgtree"));
        assert!(config.pretty_reports);

        config.apply_env(|key| (key == "ORGTREE_PRETTY_REPORTS").then(|| "maybe".to_string()));
        assert!(config.pretty_reports);
    }
}
