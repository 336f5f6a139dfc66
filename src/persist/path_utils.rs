//! Structured-path helpers over JSON objects.

use std::collections::BTreeMap;

use clan_selector::Path;
use serde_json::{Map, Value};

use super::errors::PersistError;
use super::patch_engine::PatchPlan;

/// Flatten `data` into leaf paths.
///
/// Non-empty objects are descended into; an empty object is a leaf of its
/// own, and so are arrays and scalars. Keys containing dots stay single
/// segments.
pub fn flatten(data: &Map<String, Value>) -> BTreeMap<Path, Value> {
    let mut flat = BTreeMap::new();
    flatten_into(data, &Path::root(), &mut flat);
    flat
}

fn flatten_into(data: &Map<String, Value>, parent: &Path, flat: &mut BTreeMap<Path, Value>) {
    for (key, value) in data {
        let path = parent.child(key.as_str());
        match value {
            Value::Object(map) if !map.is_empty() => flatten_into(map, &path, flat),
            other => {
                flat.insert(path, other.clone());
            }
        }
    }
}

/// Look up `path` in `data`.
pub fn get_value_by_path<'v>(data: &'v Map<String, Value>, path: &Path) -> Option<&'v Value> {
    let (last, parents) = path.segments().split_last()?;
    let mut current = data;
    for segment in parents {
        current = current.get(&segment.to_key())?.as_object()?;
    }
    current.get(&last.to_key())
}

/// Set `path` to `content`, creating intermediate objects on demand.
pub fn set_value_by_path(
    data: &mut Map<String, Value>,
    path: &Path,
    content: Value,
) -> Result<(), PersistError> {
    let Some((last, parents)) = path.segments().split_last() else {
        return Err(PersistError::NotAnObject { path: path.clone() });
    };

    let mut current = data;
    for segment in parents {
        current = current
            .entry(segment.to_key())
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| PersistError::NotAnObject { path: path.clone() })?;
    }
    current.insert(last.to_key(), content);
    Ok(())
}

/// Remove `path` from `data`, returning the removed value.
///
/// A path that is already gone is not an error.
pub fn delete_by_path(
    data: &mut Map<String, Value>,
    path: &Path,
) -> Result<Option<Value>, PersistError> {
    let Some((last, parents)) = path.segments().split_last() else {
        return Err(PersistError::NotAnObject { path: path.clone() });
    };

    let mut current = data;
    for segment in parents {
        current = match current.get_mut(&segment.to_key()) {
            None => return Ok(None),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(PersistError::NotAnObject { path: path.clone() }),
        };
    }
    Ok(current.remove(&last.to_key()))
}

/// Apply a validated plan: patches first, then deletions.
pub fn apply_plan(data: &mut Map<String, Value>, plan: &PatchPlan) -> Result<(), PersistError> {
    for (path, value) in &plan.patches {
        set_value_by_path(data, path, value.clone())?;
    }
    for path in &plan.deletes {
        delete_by_path(data, path)?;
    }
    Ok(())
}

/// Items of `all_items` that are not in `filter_items`, order preserved.
pub fn list_difference(all_items: &[Value], filter_items: &[Value]) -> Vec<Value> {
    all_items
        .iter()
        .filter(|item| !filter_items.contains(item))
        .cloned()
        .collect()
}

/// Items occurring more than once, each reported once, in order of first
/// occurrence.
pub fn find_duplicates(items: &[Value]) -> Vec<Value> {
    let mut duplicates: Vec<Value> = Vec::new();
    for (i, item) in items.iter().enumerate() {
        if items[..i].contains(item) && !duplicates.contains(item) {
            duplicates.push(item.clone());
        }
    }
    duplicates
}

/// True if `path` is at or beneath any of `prefixes`.
pub fn is_under_any<'a>(path: &Path, prefixes: impl IntoIterator<Item = &'a Path>) -> bool {
    prefixes.into_iter().any(|prefix| path.starts_with(prefix))
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
    fn test_flatten_keeps_dotted_keys_apart() {
        let data = obj(json!({"key.foo": "val1", "key": {"foo": "val2"}}));
        let flat = flatten(&data);
        assert_eq!(flat.get(&Path::from(["key.foo"])), Some(&json!("val1")));
        assert_eq!(flat.get(&Path::from(["key", "foo"])), Some(&json!("val2")));
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn test_flatten_leaves() {
        let data = obj(json!({"a": {}, "b": [1, {"x": 1}], "c": {"d": null}}));
        let flat = flatten(&data);
        assert_eq!(flat.get(&Path::from(["a"])), Some(&json!({})));
        assert_eq!(flat.get(&Path::from(["b"])), Some(&json!([1, {"x": 1}])));
        assert_eq!(flat.get(&Path::from(["c", "d"])), Some(&Value::Null));
        assert_eq!(flat.len(), 3);
    }

    #[test]
    fn test_set_value_creates_intermediates() {
        let mut data = Map::new();
        set_value_by_path(&mut data, &Path::from(["a", "b.c", "d"]), json!(1)).unwrap();
        assert_eq!(Value::Object(data), json!({"a": {"b.c": {"d": 1}}}));
    }

    #[test]
    fn test_set_value_through_scalar_fails() {
        let mut data = obj(json!({"a": 1}));
        let err = set_value_by_path(&mut data, &Path::from(["a", "b"]), json!(2)).unwrap_err();
        assert!(matches!(err, PersistError::NotAnObject { .. }));
    }

    #[test]
    fn test_delete_by_path() {
        let mut data = obj(json!({"a": {"b": 1, "c": 2}}));
        let removed = delete_by_path(&mut data, &Path::from(["a", "b"])).unwrap();
        assert_eq!(removed, Some(json!(1)));
        assert_eq!(Value::Object(data.clone()), json!({"a": {"c": 2}}));

        assert_eq!(delete_by_path(&mut data, &Path::from(["a", "b"])).unwrap(), None);
        assert_eq!(delete_by_path(&mut data, &Path::from(["x", "y"])).unwrap(), None);
        assert!(delete_by_path(&mut data, &Path::root()).is_err());
    }

    #[test]
    fn test_get_value_by_path() {
        let data = obj(json!({"a": {"b": [1]}}));
        assert_eq!(get_value_by_path(&data, &Path::from(["a", "b"])), Some(&json!([1])));
        assert_eq!(get_value_by_path(&data, &Path::from(["a", "b", "c"])), None);
        assert_eq!(get_value_by_path(&data, &Path::root()), None);
    }

    #[test]
    fn test_list_difference_keeps_order() {
        let all = vec![json!(1), json!(2), json!(3), json!(4)];
        let filter = vec![json!(3), json!(1)];
        assert_eq!(list_difference(&all, &filter), vec![json!(2), json!(4)]);
    }

    #[test]
    fn test_find_duplicates() {
        let items = vec![json!("a"), json!("b"), json!("a"), json!("c"), json!("a"), json!("b")];
        assert_eq!(find_duplicates(&items), vec![json!("a"), json!("b")]);
        assert!(find_duplicates(&[json!(1), json!("1")]).is_empty());
    }

    #[test]
    fn test_apply_plan_patches_then_deletes() {
        let mut data = obj(json!({"foo": {"bar": 1, "baz": 2}}));
        let mut plan = PatchPlan::default();
        plan.patches.insert(Path::from(["foo", "qux"]), json!(3));
        plan.deletes.insert(Path::from(["foo", "bar"]));

        apply_plan(&mut data, &plan).unwrap();
        assert_eq!(Value::Object(data), json!({"foo": {"baz": 2, "qux": 3}}));
    }
}
