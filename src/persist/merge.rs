//! Deep merge of JSON objects.

use clan_selector::Path;
use serde_json::{Map, Value};

use super::errors::{type_name, PersistError};

/// Merge `update` into `curr`.
///
/// The result holds every key of both. Attrsets merge recursively; lists are
/// concatenated with duplicates dropped (the module-system convention), or
/// replaced when `merge_lists` is false. `null` replaces anything and is
/// replaced by anything; any other change of type is an error.
pub fn merge_objects(
    curr: &Map<String, Value>,
    update: &Map<String, Value>,
    merge_lists: bool,
) -> Result<Map<String, Value>, PersistError> {
    merge_at(curr, update, merge_lists, &Path::root())
}

fn merge_at(
    curr: &Map<String, Value>,
    update: &Map<String, Value>,
    merge_lists: bool,
    parent: &Path,
) -> Result<Map<String, Value>, PersistError> {
    let mut result = curr.clone();

    for (key, update_value) in update {
        let path = parent.child(key.as_str());
        let merged = match (curr.get(key), update_value) {
            (Some(Value::Object(a)), Value::Object(b)) => {
                Value::Object(merge_at(a, b, merge_lists, &path)?)
            }
            (Some(Value::Array(a)), Value::Array(b)) if merge_lists => {
                let mut items = Vec::with_capacity(a.len() + b.len());
                for item in a.iter().chain(b) {
                    if !items.contains(item) {
                        items.push(item.clone());
                    }
                }
                Value::Array(items)
            }
            (Some(old), new)
                if !old.is_null() && !new.is_null() && !same_type(old, new) =>
            {
                return Err(PersistError::MergeTypeMismatch {
                    path,
                    old: type_name(old),
                    new: type_name(new),
                });
            }
            (_, new) => new.clone(),
        };
        result.insert(key.clone(), merged);
    }

    Ok(result)
}

fn same_type(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn merge(curr: Value, update: Value) -> Result<Value, PersistError> {
        merge_with(curr, update, true)
    }

    fn merge_with(curr: Value, update: Value, merge_lists: bool) -> Result<Value, PersistError> {
        let (Value::Object(curr), Value::Object(update)) = (curr, update) else {
            panic!("merge operands must be objects");
        };
        merge_objects(&curr, &update, merge_lists).map(Value::Object)
    }

    #[test]
    fn test_merge_objects_empty() {
        assert_eq!(merge(json!({}), json!({})).unwrap(), json!({}));
    }

    #[test]
    fn test_merge_objects_basic() {
        assert_eq!(
            merge(json!({"a": 1, "b": 2}), json!({"b": 3, "c": 4})).unwrap(),
            json!({"a": 1, "b": 3, "c": 4})
        );
    }

    #[test]
    fn test_merge_objects_null() {
        assert_eq!(merge(json!({"a": 1}), json!({"a": null})).unwrap(), json!({"a": null}));
        assert_eq!(merge(json!({"a": null}), json!({"a": 1})).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_merge_none_to_value() {
        for value in [json!({"b": 1}), json!([1, 2, 3]), json!(1), json!("test"), json!(true)] {
            let merged = merge(json!({"a": null}), json!({"a": value.clone()})).unwrap();
            assert_eq!(merged, json!({"a": value}));
        }
    }

    #[test]
    fn test_merge_value_to_none() {
        for value in [json!({"b": 1}), json!([1, 2, 3]), json!(1), json!("test"), json!(true)] {
            let merged = merge(json!({"a": value}), json!({"a": null})).unwrap();
            assert_eq!(merged, json!({"a": null}));
        }
    }

    #[test]
    fn test_merge_objects_nested() {
        assert_eq!(
            merge(json!({"a": {"b": 1, "c": 2}, "d": 3}), json!({"a": {"b": 4}, "e": 5})).unwrap(),
            json!({"a": {"b": 4, "c": 2}, "d": 3, "e": 5})
        );
    }

    #[test]
    fn test_merge_objects_lists() {
        assert_eq!(
            merge(
                json!({"a": [1, 2], "b": {"c": [3, 4]}}),
                json!({"a": [2, 3], "b": {"c": [4, 5]}})
            )
            .unwrap(),
            json!({"a": [1, 2, 3], "b": {"c": [3, 4, 5]}})
        );
    }

    #[test]
    fn test_merge_objects_replace_lists() {
        assert_eq!(
            merge_with(
                json!({"a": [1, 2], "b": {"c": [3, 4]}}),
                json!({"a": [], "b": {"c": [5]}}),
                false
            )
            .unwrap(),
            json!({"a": [], "b": {"c": [5]}})
        );
    }

    #[test]
    fn test_merge_objects_with_mismatching_nesting() {
        let err = merge(json!({"a": {"b": 1}, "c": 2}), json!({"a": 3})).unwrap_err();
        assert_eq!(
            err,
            PersistError::MergeTypeMismatch {
                path: Path::from(["a"]),
                old: "attrset",
                new: "number"
            }
        );
        assert!(err.to_string().starts_with("type mismatch for key 'a'"));
    }

    #[test]
    fn test_merge_mismatch_reports_nested_path() {
        let err = merge(json!({"x": {"y": "s"}}), json!({"x": {"y": [1]}})).unwrap_err();
        assert_eq!(err.path(), Some(&Path::from(["x", "y"])));
    }
}
