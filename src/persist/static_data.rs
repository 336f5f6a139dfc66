//! Declarative-only data.
//!
//! Whatever the evaluated values hold that the overlay does not is defined
//! in `.nix` files and cannot be changed or removed through the overlay.
//! Lists follow the module-system append convention: the overlay stores only
//! the items it adds, so the remaining items of an evaluated list are static.

use std::collections::BTreeMap;

use clan_selector::Path;
use serde_json::{Map, Value};

use super::path_utils::{flatten, list_difference};

/// Leaf paths of `all_values` that the overlay does not provide, and for
/// lists present in both, the items only the declarative layer provides.
pub fn calculate_static_data(
    all_values: &Map<String, Value>,
    persisted: &Map<String, Value>,
) -> BTreeMap<Path, Value> {
    let persisted_flat = flatten(persisted);
    let mut static_flat = BTreeMap::new();

    for (path, value) in flatten(all_values) {
        match persisted_flat.get(&path) {
            None => {
                static_flat.insert(path, value);
            }
            Some(Value::Array(persisted_items)) => {
                if let Value::Array(items) = &value {
                    let static_items = list_difference(items, persisted_items);
                    if !static_items.is_empty() {
                        static_flat.insert(path, Value::Array(static_items));
                    }
                }
            }
            Some(_) => {}
        }
    }
    static_flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {}", other),
        }
    }

    #[test]
    fn test_calculate_static_data_basic() {
        let all_values = obj(json!({
            "name": "example",
            "version": 1,
            "settings": {"optionA": true, "optionB": false, "listSetting": [1, 2, 3, 4]},
            "staticOnly": "staticValue",
        }));
        let persisted = obj(json!({
            "name": "example",
            "version": 1,
            "settings": {"optionA": true, "listSetting": [2, 3]},
        }));

        let static_data = calculate_static_data(&all_values, &persisted);
        let expected: BTreeMap<Path, Value> = [
            (Path::from(["settings", "optionB"]), json!(false)),
            (Path::from(["settings", "listSetting"]), json!([1, 4])),
            (Path::from(["staticOnly"]), json!("staticValue")),
        ]
        .into_iter()
        .collect();
        assert_eq!(static_data, expected);
    }

    #[test]
    fn test_calculate_static_data_all_persisted() {
        let data = obj(json!({"a": {"b": [1, 2]}, "c": "d"}));
        assert!(calculate_static_data(&data, &data).is_empty());
    }

    #[test]
    fn test_calculate_static_data_empty_objects() {
        let all_values = obj(json!({"a": {}, "b": {"c": {}}}));
        let persisted = obj(json!({"a": {}}));
        let static_data = calculate_static_data(&all_values, &persisted);
        assert_eq!(static_data.len(), 1);
        assert_eq!(static_data.get(&Path::from(["b", "c"])), Some(&json!({})));
    }

    #[test]
    fn test_calculate_static_data_dotted_keys() {
        let all_values = obj(json!({"key.foo": "static", "key": {"foo": "nested"}}));
        let persisted = obj(json!({"key": {"foo": "nested"}}));
        let static_data = calculate_static_data(&all_values, &persisted);
        assert_eq!(static_data.len(), 1);
        assert_eq!(static_data.get(&Path::from(["key.foo"])), Some(&json!("static")));
    }

    #[test]
    fn test_list_type_change_is_not_static() {
        let all_values = obj(json!({"a": [1, 2]}));
        let persisted = obj(json!({"a": "x"}));
        assert!(calculate_static_data(&all_values, &persisted).is_empty());
    }
}
