//! Unwrapping of deferred module values
//!
//! Options typed as deferred modules evaluate to an import wrapper around
//! the user's value:
//!
//! ```json
//! {"imports": [{"_file": "...", "imports": [<value>]}]}
//! ```
//!
//! Reads hand out `<value>` instead, but only at paths where such options are
//! expected; a wrapper anywhere else means the inventory schema changed.

use clan_selector::Path;
use serde_json::{Map, Value};

use super::StoreError;

/// Paths whose values may be unwrapped, with `*` matching any key
pub const DEFAULT_UNWRAP_PATHS: &[&str] = &[
    "instances.*.roles.*.settings",
    "instances.*.roles.*.machines.*.settings",
];

/// The wrapped value, or `None` if `value` is not an import wrapper.
pub fn unwrap_deferred_module(value: &Value) -> Option<&Value> {
    let [Value::Object(inner)] = value.get("imports")?.as_array()?.as_slice() else {
        return None;
    };
    if !inner.contains_key("_file") {
        return None;
    }
    match inner.get("imports")?.as_array()?.as_slice() {
        [wrapped] => Some(wrapped),
        _ => None,
    }
}

/// True if `path` has as many segments as one of `patterns` and matches it
/// segment by segment.
pub fn path_matches<S: AsRef<str>>(path: &Path, patterns: &[S]) -> bool {
    patterns.iter().any(|pattern| {
        let parts: Vec<&str> = pattern.as_ref().split('.').collect();
        parts.len() == path.len()
            && parts
                .iter()
                .zip(path.segments())
                .all(|(part, segment)| *part == "*" || segment.as_key() == Some(*part))
    })
}

/// Copy of `data` with import wrappers replaced by their value. Only objects
/// are walked; a wrapper outside `allowed` is an error.
pub fn sanitize<S: AsRef<str>>(
    data: &Map<String, Value>,
    allowed: &[S],
) -> Result<Map<String, Value>, StoreError> {
    sanitize_at(data, allowed, &Path::root())
}

fn sanitize_at<S: AsRef<str>>(
    data: &Map<String, Value>,
    allowed: &[S],
    parent: &Path,
) -> Result<Map<String, Value>, StoreError> {
    let mut result = Map::with_capacity(data.len());
    for (key, value) in data {
        let path = parent.child(key.as_str());
        let sanitized = if let Some(wrapped) = unwrap_deferred_module(value) {
            if !path_matches(&path, allowed) {
                return Err(StoreError::DisallowedUnwrap(path));
            }
            wrapped.clone()
        } else if let Value::Object(map) = value {
            Value::Object(sanitize_at(map, allowed, &path)?)
        } else {
            value.clone()
        };
        result.insert(key.clone(), sanitized);
    }
    Ok(result)
}
