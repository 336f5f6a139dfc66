//! Typed view of the merged configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::effective::ConfigError;
use crate::flake::CACHE_DIR_NAME;

/// Host config file, relative to `$HOME`
pub const HOST_CONFIG_PATH: &str = ".config/clan/persist.toml";

/// Repo config file, relative to the flake directory
pub const REPO_CONFIG_PATH: &str = ".clan/persist.toml";

/// Log output format
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSettings {
    pub enabled: bool,

    /// Defaults to `~/.cache/clan/flakes-v2`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectorSettings {
    /// Priority tree of the inventory
    pub priorities: String,

    /// Evaluated inventory values
    pub all_values: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
}

/// Settings after all layers are merged
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub store_dir: String,
    pub inventory_file: String,
    pub cache: CacheSettings,
    pub selectors: SelectorSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Directory for persisted evaluation caches, or `None` when disabled.
    pub fn cache_dir(&self) -> Result<Option<PathBuf>, ConfigError> {
        if !self.cache.enabled {
            return Ok(None);
        }
        match &self.cache.dir {
            Some(dir) => Ok(Some(dir.clone())),
            None => {
                let home = home_dir()?;
                Ok(Some(home.join(".cache/clan").join(CACHE_DIR_NAME)))
            }
        }
    }

    /// Overlay file inside `flake_dir`.
    pub fn inventory_path(&self, flake_dir: &Path) -> PathBuf {
        flake_dir.join(&self.inventory_file)
    }
}

/// Default host config location.
pub fn host_config_path() -> Result<PathBuf, ConfigError> {
    Ok(home_dir()?.join(HOST_CONFIG_PATH))
}

/// Repo config location for a flake checkout.
pub fn repo_config_path(flake_dir: &Path) -> PathBuf {
    flake_dir.join(REPO_CONFIG_PATH)
}

fn home_dir() -> Result<PathBuf, ConfigError> {
    let home = std::env::var("HOME")
        .map_err(|_| ConfigError::IoError("HOME environment variable not set".to_string()))?;
    Ok(PathBuf::from(home))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(cache: CacheSettings) -> Settings {
        Settings {
            store_dir: "/nix/store".to_string(),
            inventory_file: "inventory.json".to_string(),
            cache,
            selectors: SelectorSettings {
                priorities: "p".to_string(),
                all_values: "v".to_string(),
            },
            log: LogSettings {
                level: "warn".to_string(),
                format: LogFormat::Compact,
            },
        }
    }

    #[test]
    fn test_cache_dir_disabled() {
        let s = settings(CacheSettings {
            enabled: false,
            dir: Some(PathBuf::from("/tmp/x")),
        });
        assert_eq!(s.cache_dir().unwrap(), None);
    }

    #[test]
    fn test_cache_dir_explicit() {
        let s = settings(CacheSettings {
            enabled: true,
            dir: Some(PathBuf::from("/var/cache/clan")),
        });
        assert_eq!(s.cache_dir().unwrap(), Some(PathBuf::from("/var/cache/clan")));
    }

    #[test]
    fn test_inventory_path() {
        let s = settings(CacheSettings {
            enabled: false,
            dir: None,
        });
        assert_eq!(
            s.inventory_path(Path::new("/src/fleet")),
            PathBuf::from("/src/fleet/inventory.json")
        );
    }

    #[test]
    fn test_repo_config_path() {
        assert_eq!(
            repo_config_path(Path::new("/src/fleet")),
            PathBuf::from("/src/fleet/.clan/persist.toml")
        );
    }

    #[test]
    fn test_log_format_serde() {
        assert_eq!(serde_json::to_string(&LogFormat::Json).unwrap(), "\"json\"");
        let format: LogFormat = serde_json::from_str("\"compact\"").unwrap();
        assert_eq!(format, LogFormat::Compact);
    }
}
