//! Per-path checks applied while computing a patch plan.

use std::collections::{BTreeMap, BTreeSet};

use clan_selector::Path;
use serde_json::Value;

use super::errors::{type_name, PersistError};
use super::path_utils::find_duplicates;
use super::write_rules::AttributeMap;

/// Value classes that may replace each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueClass {
    Scalar,
    List,
    Attrs,
}

fn class_of(value: &Value) -> Option<ValueClass> {
    match value {
        Value::Null => None,
        Value::Array(_) => Some(ValueClass::List),
        Value::Object(_) => Some(ValueClass::Attrs),
        _ => Some(ValueClass::Scalar),
    }
}

pub fn validate_writeability(path: &Path, attributes: &AttributeMap) -> Result<(), PersistError> {
    if attributes.is_writeable(path)? {
        Ok(())
    } else {
        Err(PersistError::NotWriteable { path: path.clone() })
    }
}

/// Old and new value must be of the same class; `null` on either side is
/// compatible with anything.
pub fn validate_type_compatibility(
    path: &Path,
    old: Option<&Value>,
    new: Option<&Value>,
) -> Result<(), PersistError> {
    let (Some(old), Some(new)) = (old, new) else {
        return Ok(());
    };
    match (class_of(old), class_of(new)) {
        (Some(a), Some(b)) if a != b => Err(PersistError::TypeMismatch {
            path: path.clone(),
            old: type_name(old),
            new: type_name(new),
        }),
        _ => Ok(()),
    }
}

pub fn validate_list_uniqueness(path: &Path, value: &Value) -> Result<(), PersistError> {
    let Value::Array(items) = value else {
        return Ok(());
    };
    let duplicates = find_duplicates(items);
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(PersistError::DuplicateListItems {
            path: path.clone(),
            duplicates,
        })
    }
}

/// Static data cannot be overwritten with `null`.
pub fn validate_no_static_nulling(
    path: &Path,
    value: &Value,
    static_data: &BTreeMap<Path, Value>,
) -> Result<(), PersistError> {
    if value.is_null() && static_data.contains_key(path) {
        return Err(PersistError::StaticData {
            path: path.clone(),
            reason: "its value is defined in a .nix file".to_string(),
        });
    }
    Ok(())
}

/// A new list must keep every item the declarative layer contributes.
pub fn validate_no_static_deletion(
    path: &Path,
    new_items: &[Value],
    static_items: &[Value],
) -> Result<(), PersistError> {
    let missing: Vec<String> = static_items
        .iter()
        .filter(|item| !new_items.contains(item))
        .map(|item| item.to_string())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(PersistError::StaticData {
        path: path.clone(),
        reason: format!(
            "items [{}] are defined in a .nix file and cannot be removed",
            missing.join(", ")
        ),
    })
}

/// No patch may touch a path that is being deleted, or anything beneath it.
pub fn validate_patch_conflicts<'a>(
    patches: impl IntoIterator<Item = &'a Path>,
    deletes: &BTreeSet<Path>,
) -> Result<(), PersistError> {
    let conflicts: BTreeSet<Path> = patches
        .into_iter()
        .filter(|path| deletes.iter().any(|delete| path.starts_with(delete)))
        .cloned()
        .collect();
    if conflicts.is_empty() {
        return Ok(());
    }
    Err(PersistError::PatchConflict {
        paths: conflicts.into_iter().collect(),
    })
}
