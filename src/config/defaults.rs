//! Built-in defaults (layer 1)
//!
//! Hardcoded defaults for all configuration values.

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_STORE_DIR;
use crate::persist::DEFAULT_INVENTORY_FILE;

/// Selector for the priority tree of the inventory
pub const DEFAULT_PRIORITIES_SELECTOR: &str = "clanInternals.inventoryClass.introspection";

/// Selector for the evaluated inventory
pub const DEFAULT_ALL_VALUES_SELECTOR: &str = "clanInternals.inventoryClass.allValues";

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Store prefix of realised paths (default: "/nix/store")
    pub store_dir: String,

    /// Overlay file name inside the flake (default: "inventory.json")
    pub inventory_file: String,

    /// Persist the evaluation cache between runs (default: true)
    pub cache_enabled: bool,

    /// Selector for the priority tree
    pub priorities_selector: String,

    /// Selector for the evaluated values
    pub all_values_selector: String,

    /// Log level when RUST_LOG is unset (default: "warn")
    pub log_level: String,

    /// Log format (default: "compact")
    pub log_format: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            store_dir: DEFAULT_STORE_DIR.to_string(),
            inventory_file: DEFAULT_INVENTORY_FILE.to_string(),
            cache_enabled: true,
            priorities_selector: DEFAULT_PRIORITIES_SELECTOR.to_string(),
            all_values_selector: DEFAULT_ALL_VALUES_SELECTOR.to_string(),
            log_level: "warn".to_string(),
            log_format: "compact".to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "store_dir": self.store_dir,
            "inventory_file": self.inventory_file,
            "cache": {
                "enabled": self.cache_enabled
            },
            "selectors": {
                "priorities": self.priorities_selector,
                "all_values": self.all_values_selector
            },
            "log": {
                "level": self.log_level,
                "format": self.log_format
            }
        })
    }
}
