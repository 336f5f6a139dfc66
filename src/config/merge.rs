//! Layer merge for settings
//!
//! Later layers win. Tables merge key by key, everything else (arrays
//! included) is replaced whole.

use serde_json::Value;

/// Merge `overlay` on top of `base`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut merged), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let value = match merged.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                merged.insert(key, value);
            }
            Value::Object(merged)
        }
        (_, overlay) => overlay,
    }
}

/// Fold `layers` from lowest to highest precedence.
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_override() {
        let merged = deep_merge(json!({"store_dir": "/nix/store"}), json!({"store_dir": "/gnu/store"}));
        assert_eq!(merged["store_dir"], "/gnu/store");
    }

    #[test]
    fn test_table_merge_keeps_siblings() {
        let merged = deep_merge(
            json!({"log": {"level": "warn", "format": "compact"}}),
            json!({"log": {"level": "debug"}}),
        );
        assert_eq!(merged, json!({"log": {"level": "debug", "format": "compact"}}));
    }

    #[test]
    fn test_arrays_replace() {
        let merged = deep_merge(json!({"extra": ["a", "b", "c"]}), json!({"extra": ["x"]}));
        assert_eq!(merged["extra"], json!(["x"]));
    }

    #[test]
    fn test_null_overrides() {
        let merged = deep_merge(json!({"cache": {"dir": "/tmp/c"}}), json!({"cache": {"dir": null}}));
        assert!(merged["cache"]["dir"].is_null());
    }

    #[test]
    fn test_table_replaces_scalar() {
        let merged = deep_merge(json!({"cache": false}), json!({"cache": {"enabled": true}}));
        assert_eq!(merged["cache"], json!({"enabled": true}));
    }

    #[test]
    fn test_merge_layers_precedence() {
        let builtin = json!({"inventory_file": "inventory.json", "log": {"level": "warn"}});
        let host = json!({"log": {"level": "info"}});
        let repo = json!({"inventory_file": "fleet.json"});
        let cli = json!({"log": {"level": "trace"}});

        let merged = merge_layers(vec![builtin, host, repo, cli]);
        assert_eq!(merged["inventory_file"], "fleet.json");
        assert_eq!(merged["log"]["level"], "trace");
    }

    #[test]
    fn test_merge_layers_empty() {
        assert_eq!(merge_layers(Vec::new()), Value::Null);
    }
}
