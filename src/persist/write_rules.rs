//! Writeability resolution
//!
//! Combines the priority tree reported by the evaluator's introspection with
//! the evaluated values and the overlay contents, and tags every known path
//! with what the overlay may do to it.
//!
//! - Values set with a priority below [`WRITABLE_PRIORITY_THRESHOLD`] are
//!   forced by the declarative layer; they and everything beneath them are
//!   read-only.
//! - Children inherit the priority of their parent unless they carry their
//!   own.
//! - At exactly the threshold a value is writeable if it merges (attrset or
//!   list) or if the overlay already holds it.
//! - A value may be deleted if only the overlay file defines it and its
//!   parent is not `total`.

use std::collections::{BTreeMap, BTreeSet};

use clan_selector::Path;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::PersistError;

/// Priorities below this are not writeable.
pub const WRITABLE_PRIORITY_THRESHOLD: i64 = 100;

/// Name of the overlay file as the evaluator reports it in definition sites.
pub const DEFAULT_INVENTORY_FILE: &str = "inventory.json";

const META_KEYS: [&str; 3] = ["__this", "__prio", "__list"];

/// What the overlay may do to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceAttribute {
    Write,
    Readonly,
    Delete,
}

/// Persistence tags per path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap {
    entries: BTreeMap<Path, BTreeSet<PersistenceAttribute>>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<&BTreeSet<PersistenceAttribute>> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &BTreeSet<PersistenceAttribute>)> {
        self.entries.iter()
    }

    /// Add `attribute` to the tags of `path`.
    pub fn insert(&mut self, path: Path, attribute: PersistenceAttribute) {
        self.entries.entry(path).or_default().insert(attribute);
    }

    /// Replace whatever `path` carries with exactly `READONLY`.
    fn force_readonly(&mut self, path: Path) {
        let tags = self.entries.entry(path).or_default();
        tags.clear();
        tags.insert(PersistenceAttribute::Readonly);
    }

    /// Writeability of `path`, decided by the path itself or its nearest
    /// tagged ancestor.
    pub fn is_writeable(&self, path: &Path) -> Result<bool, PersistError> {
        for ancestor in path.ancestors() {
            if let Some(tags) = self.entries.get(&ancestor) {
                if tags.contains(&PersistenceAttribute::Write) {
                    return Ok(true);
                }
                if tags.contains(&PersistenceAttribute::Readonly) {
                    return Ok(false);
                }
            }
        }
        Err(PersistError::UnknownWriteability { path: path.clone() })
    }

    /// True if `path` itself carries `DELETE`.
    pub fn is_deletable(&self, path: &Path) -> bool {
        self.entries
            .get(path)
            .is_some_and(|tags| tags.contains(&PersistenceAttribute::Delete))
    }
}

impl FromIterator<(Path, BTreeSet<PersistenceAttribute>)> for AttributeMap {
    fn from_iter<I: IntoIterator<Item = (Path, BTreeSet<PersistenceAttribute>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// One row of an [`AttributeMap`], for JSON output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeEntry {
    pub path: Path,
    pub attributes: BTreeSet<PersistenceAttribute>,
}

impl Serialize for AttributeMap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter().map(|(path, attributes)| AttributeEntry {
            path: path.clone(),
            attributes: attributes.clone(),
        }))
    }
}

impl<'de> Deserialize<'de> for AttributeMap {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rows = Vec::<AttributeEntry>::deserialize(deserializer)?;
        Ok(rows
            .into_iter()
            .map(|row| (row.path, row.attributes))
            .collect())
    }
}

/// Compute persistence tags for every path of the priority tree and of the
/// evaluated values.
///
/// `priorities` must cover every top-level key of `all_values`.
pub fn compute_attribute_persistence(
    priorities: &Map<String, Value>,
    all_values: &Map<String, Value>,
    persisted: &Map<String, Value>,
    inventory_file_name: &str,
) -> Result<AttributeMap, PersistError> {
    let mut unsupported: Vec<String> = all_values
        .keys()
        .filter(|key| !priorities.contains_key(*key))
        .cloned()
        .collect();
    if !unsupported.is_empty() {
        unsupported.sort();
        return Err(PersistError::MissingPriorities { keys: unsupported });
    }

    let mut resolver = Resolver {
        inventory_file_name,
        map: AttributeMap::new(),
    };
    resolver.visit(
        priorities,
        all_values,
        persisted,
        &Path::root(),
        Inherited {
            priority: None,
            readonly: false,
            total: true,
        },
    )?;
    Ok(resolver.map)
}

#[derive(Debug, Clone, Copy)]
struct Inherited {
    priority: Option<i64>,
    readonly: bool,
    total: bool,
}

struct Resolver<'a> {
    inventory_file_name: &'a str,
    map: AttributeMap,
}

impl Resolver<'_> {
    fn visit(
        &mut self,
        priorities: &Map<String, Value>,
        all_values: &Map<String, Value>,
        persisted: &Map<String, Value>,
        parent: &Path,
        inherited: Inherited,
    ) -> Result<(), PersistError> {
        let empty = Map::new();

        for key in child_keys(priorities, all_values) {
            let node = priorities.get(key).and_then(Value::as_object).unwrap_or(&empty);
            let value = all_values.get(key);
            let path = parent.child(key.as_str());

            if !inherited.total && self.is_exclusive(node) != Some(false) {
                self.map.insert(path.clone(), PersistenceAttribute::Delete);
            }

            let priority = own_priority(node).or(inherited.priority);
            let child_values = value.and_then(Value::as_object).unwrap_or(&empty);

            if inherited.readonly || priority.is_some_and(|p| p < WRITABLE_PRIORITY_THRESHOLD) {
                self.map.force_readonly(path.clone());
                self.visit(
                    node,
                    child_values,
                    &empty,
                    &path,
                    Inherited {
                        priority,
                        readonly: true,
                        total: is_total(node),
                    },
                )?;
                continue;
            }

            let Some(priority) = priority else {
                return Err(PersistError::UndefinedPriority { path });
            };

            let mergeable = matches!(value, Some(Value::Object(_) | Value::Array(_)));
            let writeable = priority > WRITABLE_PRIORITY_THRESHOLD
                || mergeable
                || persisted.contains_key(key);
            if writeable {
                self.map.insert(path.clone(), PersistenceAttribute::Write);
            } else {
                self.map.force_readonly(path.clone());
            }

            let child_persisted = persisted.get(key).and_then(Value::as_object).unwrap_or(&empty);
            self.visit(
                node,
                child_values,
                child_persisted,
                &path,
                Inherited {
                    priority: Some(priority),
                    readonly: !writeable,
                    total: is_total(node),
                },
            )?;
        }
        Ok(())
    }

    /// `Some(true)` if only the overlay file defines the node, `None` if the
    /// evaluator did not report definition sites.
    fn is_exclusive(&self, node: &Map<String, Value>) -> Option<bool> {
        let files = node.get("__this")?.get("files")?.as_array()?;
        if files.is_empty() {
            return None;
        }
        Some(files.len() == 1 && files[0].as_str() == Some(self.inventory_file_name))
    }
}

/// Children to visit: attrset entries of the priority node (metadata keys
/// excluded) followed by evaluated keys the priority node does not list.
fn child_keys<'m>(
    priorities: &'m Map<String, Value>,
    all_values: &'m Map<String, Value>,
) -> Vec<&'m String> {
    let mut keys: Vec<&String> = priorities
        .iter()
        .filter(|(key, value)| !META_KEYS.contains(&key.as_str()) && value.is_object())
        .map(|(key, _)| key)
        .collect();
    for key in all_values.keys() {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

fn own_priority(node: &Map<String, Value>) -> Option<i64> {
    node.get("__prio")
        .and_then(Value::as_i64)
        .or_else(|| node.get("__this")?.get("prio")?.as_i64())
}

fn is_total(node: &Map<String, Value>) -> bool {
    node.get("__this")
        .and_then(|this| this.get("total"))
        .or_else(|| node.get("total"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use PersistenceAttribute::{Delete, Readonly, Write};

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {}", other),
        }
    }

    fn compute(priorities: Value, all_values: Value, persisted: Value) -> AttributeMap {
        compute_attribute_persistence(
            &obj(priorities),
            &obj(all_values),
            &obj(persisted),
            DEFAULT_INVENTORY_FILE,
        )
        .unwrap()
    }

    fn tags(items: &[PersistenceAttribute]) -> BTreeSet<PersistenceAttribute> {
        items.iter().copied().collect()
    }

    fn expected(rows: Vec<(Path, BTreeSet<PersistenceAttribute>)>) -> AttributeMap {
        rows.into_iter().collect()
    }

    #[test]
    fn test_write_simple() {
        let prios = json!({
            "foo": {
                "__this": {"prio": 100},
                "bar": {"__this": {"prio": 1000}},
            },
            "foo.bar": {"__this": {"prio": 1000}},
        });
        let res = compute(prios, json!({"foo": {}}), json!({}));

        assert_eq!(
            res,
            expected(vec![
                (Path::from(["foo"]), tags(&[Write])),
                (Path::from(["foo", "bar"]), tags(&[Write, Delete])),
                (Path::from(["foo.bar"]), tags(&[Write])),
            ])
        );
    }

    #[test]
    fn test_write_inherited() {
        let prios = json!({
            "foo": {
                "__prio": 100,
                "bar": {
                    "baz": {"__prio": 1000},
                },
            },
        });
        let res = compute(prios, json!({"foo": {"bar": {}}}), json!({}));

        assert_eq!(
            res,
            expected(vec![
                (Path::from(["foo"]), tags(&[Write])),
                (Path::from(["foo", "bar"]), tags(&[Write, Delete])),
                (Path::from(["foo", "bar", "baz"]), tags(&[Write, Delete])),
            ])
        );
    }

    #[test]
    fn test_non_write_inherited() {
        let prios = json!({
            "foo": {
                "__prio": 50,
                "bar": {
                    "baz": {"__prio": 1000},
                },
            },
        });
        let res = compute(prios, json!({}), json!({}));

        assert_eq!(
            res,
            expected(vec![
                (Path::from(["foo"]), tags(&[Readonly])),
                (Path::from(["foo", "bar"]), tags(&[Readonly])),
                (Path::from(["foo", "bar", "baz"]), tags(&[Readonly])),
            ])
        );
    }

    #[test]
    fn test_write_list() {
        let res = compute(
            json!({"foo": {"__prio": 100}}),
            json!({"foo": ["a", "b"]}),
            json!({}),
        );
        assert_eq!(res, expected(vec![(Path::from(["foo"]), tags(&[Write]))]));
    }

    #[test]
    fn test_write_because_written() {
        let prios = json!({
            "foo": {
                "__prio": 100,
                "bar": {
                    "baz": {"__prio": 100},
                    "foobar": {"__prio": 100},
                },
            },
        });

        let res = compute(prios.clone(), json!({"foo": {"bar": {}}}), json!({}));
        assert_eq!(
            res,
            expected(vec![
                (Path::from(["foo"]), tags(&[Write])),
                (Path::from(["foo", "bar"]), tags(&[Write, Delete])),
                (Path::from(["foo", "bar", "baz"]), tags(&[Readonly])),
                (Path::from(["foo", "bar", "foobar"]), tags(&[Readonly])),
            ])
        );

        let res = compute(prios, json!({}), json!({"foo": {"bar": {"baz": "foo"}}}));
        assert_eq!(
            res.get(&Path::from(["foo", "bar", "baz"])),
            Some(&tags(&[Write, Delete]))
        );
    }

    #[test]
    fn test_static_object() {
        let this = |files: Value| json!({"files": files, "prio": 100, "total": false});
        let shared = json!(["inventory.json", "<unknown-file>"]);
        let introspection = json!({
            "foo": {
                "__this": this(shared.clone()),
                "a": {
                    "__this": this(shared.clone()),
                    "c": {
                        "__this": this(shared),
                        "bar": {"__this": this(json!(["inventory.json"]))},
                    },
                },
            },
        });
        let data = json!({"foo": {"a": {"c": {"bar": 1}}}});

        let res = compute(introspection, data.clone(), data);
        assert_eq!(
            res,
            expected(vec![
                (Path::from(["foo"]), tags(&[Write])),
                (Path::from(["foo", "a"]), tags(&[Write])),
                (Path::from(["foo", "a", "c"]), tags(&[Write])),
                (Path::from(["foo", "a", "c", "bar"]), tags(&[Write, Delete])),
            ])
        );
    }

    #[test]
    fn test_attributes_totality() {
        let introspection = json!({
            "foo": {
                "__this": {"files": ["inventory.json"], "prio": 100, "total": true},
                "a": {
                    "__this": {
                        "files": ["inventory.json", "<unknown-file>"],
                        "prio": 100,
                        "total": false,
                    },
                },
            },
        });
        let data = json!({"foo": {"a": {}}});

        let res = compute(introspection, data.clone(), data);
        assert_eq!(
            res,
            expected(vec![
                (Path::from(["foo"]), tags(&[Write])),
                (Path::from(["foo", "a"]), tags(&[Write])),
            ])
        );
    }

    #[test]
    fn test_plain_total_flag() {
        let prios = json!({"foo": {"__prio": 100, "total": true, "a": {"__prio": 1000}}});
        let res = compute(prios, json!({"foo": {"a": 1}}), json!({}));
        assert_eq!(res.get(&Path::from(["foo", "a"])), Some(&tags(&[Write])));
        assert!(!res.contains(&Path::from(["foo", "total"])));
    }

    #[test]
    fn test_evaluated_keys_without_priority_inherit() {
        let prios = json!({"machines": {"__prio": 100}});
        let res = compute(
            prios,
            json!({"machines": {"jon": {"deploy": "root@jon"}}}),
            json!({"machines": {"jon": {"deploy": "root@jon"}}}),
        );
        assert_eq!(
            res.get(&Path::from(["machines", "jon"])),
            Some(&tags(&[Write, Delete]))
        );
        assert_eq!(
            res.get(&Path::from(["machines", "jon", "deploy"])),
            Some(&tags(&[Write, Delete]))
        );
    }

    #[test]
    fn test_missing_top_level_priorities() {
        let err = compute_attribute_persistence(
            &obj(json!({"foo": {"__prio": 100}})),
            &obj(json!({"foo": {}, "zzz": 1, "aaa": 2})),
            &Map::new(),
            DEFAULT_INVENTORY_FILE,
        )
        .unwrap_err();
        assert_eq!(
            err,
            PersistError::MissingPriorities {
                keys: vec!["aaa".to_string(), "zzz".to_string()]
            }
        );
    }

    #[test]
    fn test_undefined_priority() {
        let err = compute_attribute_persistence(
            &obj(json!({"foo": {"bar": {}}})),
            &Map::new(),
            &Map::new(),
            DEFAULT_INVENTORY_FILE,
        )
        .unwrap_err();
        assert_eq!(err, PersistError::UndefinedPriority { path: Path::from(["foo"]) });
    }

    #[test]
    fn test_is_writeable_walks_up() {
        let res = compute(
            json!({"foo": {"__prio": 100, "bar": {"__prio": 50}}}),
            json!({"foo": {"bar": {}}}),
            json!({}),
        );
        assert!(res.is_writeable(&Path::from(["foo", "new", "deep"])).unwrap());
        assert!(!res.is_writeable(&Path::from(["foo", "bar", "x"])).unwrap());
        assert!(matches!(
            res.is_writeable(&Path::from(["other"])),
            Err(PersistError::UnknownWriteability { .. })
        ));
    }

    #[test]
    fn test_readonly_is_inherited_downward() {
        let res = compute(
            json!({"foo": {"__prio": 50, "bar": {"__prio": 1500, "baz": {"__prio": 2000}}}}),
            json!({"foo": {"bar": {"baz": 1}}}),
            json!({"foo": {"bar": {"baz": 1}}}),
        );
        for (_, found) in res.iter() {
            assert_eq!(found, &tags(&[Readonly]));
        }
    }

    #[test]
    fn test_unset_scalar_at_threshold_locks_children() {
        let res = compute(
            json!({"foo": {"__prio": 100, "bar": {"__prio": 1000}}}),
            json!({"foo": null}),
            json!({}),
        );
        assert_eq!(res.get(&Path::from(["foo"])), Some(&tags(&[Readonly])));
        assert_eq!(res.get(&Path::from(["foo", "bar"])), Some(&tags(&[Readonly])));
        assert!(!res.is_writeable(&Path::from(["foo"])).unwrap());
        assert!(!res.is_writeable(&Path::from(["foo", "bar"])).unwrap());

        // Once the overlay holds the value the subtree opens up again
        let res = compute(
            json!({"foo": {"__prio": 100, "bar": {"__prio": 1000}}}),
            json!({"foo": null}),
            json!({"foo": null}),
        );
        assert!(res.is_writeable(&Path::from(["foo", "bar"])).unwrap());
    }

    #[test]
    fn test_serialize_as_rows() {
        let res = compute(json!({"foo": {"__prio": 100}}), json!({"foo": {}}), json!({}));
        let rows = serde_json::to_value(&res).unwrap();
        assert_eq!(rows, json!([{"path": ["foo"], "attributes": ["write"]}]));

        let back: AttributeMap = serde_json::from_value(rows).unwrap();
        assert_eq!(back, res);
    }
}
