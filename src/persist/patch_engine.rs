//! Patch computation
//!
//! Turns "the state the caller wants" into the smallest set of overlay writes
//! and deletions that produce it, rejecting anything the declarative layer
//! owns. Either the whole plan validates or no plan is returned.

use std::collections::{BTreeMap, BTreeSet};

use clan_selector::Path;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::errors::PersistError;
use super::path_utils::{flatten, is_under_any, list_difference};
use super::static_data::calculate_static_data;
use super::validate::{
    validate_list_uniqueness, validate_no_static_deletion, validate_no_static_nulling,
    validate_patch_conflicts, validate_type_compatibility, validate_writeability,
};
use super::write_rules::AttributeMap;

/// Canonicalization failure while digesting a plan
#[derive(Debug, thiserror::Error)]
#[error("JCS canonicalization error: {0}")]
pub struct DigestError(String);

/// Validated overlay changes: values to set and paths to remove.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchPlan {
    #[serde(with = "patch_rows")]
    pub patches: BTreeMap<Path, Value>,
    pub deletes: BTreeSet<Path>,
}

impl PatchPlan {
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty() && self.deletes.is_empty()
    }

    /// SHA-256 hex digest of the canonical (RFC 8785) JSON form of the plan.
    ///
    /// Equal plans have equal digests, so a caller can confirm that the plan
    /// it reviewed is the plan being written.
    pub fn digest(&self) -> Result<String, DigestError> {
        let jcs_bytes =
            serde_json_canonicalizer::to_vec(self).map_err(|e| DigestError(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&jcs_bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

/// `patches` as a list of `{path, value}` rows; JSON object keys cannot hold
/// structured paths.
mod patch_rows {
    use std::collections::BTreeMap;

    use clan_selector::Path;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    #[derive(Serialize)]
    struct RowRef<'a> {
        path: &'a Path,
        value: &'a Value,
    }

    #[derive(Deserialize)]
    struct Row {
        path: Path,
        value: Value,
    }

    pub fn serialize<S: Serializer>(
        patches: &BTreeMap<Path, Value>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(patches.iter().map(|(path, value)| RowRef { path, value }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Path, Value>, D::Error> {
        let rows = Vec::<Row>::deserialize(deserializer)?;
        Ok(rows.into_iter().map(|row| (row.path, row.value)).collect())
    }
}

/// Paths of `all_values` that `update` removes.
///
/// A key missing from `update` removes its whole subtree. An attrset that
/// was non-empty and is now `{}` removes each of its children. A non-object
/// update value (including `null`) replaces rather than removes.
pub fn find_deleted_paths(
    all_values: &Map<String, Value>,
    update: &Map<String, Value>,
) -> BTreeSet<Path> {
    let mut deleted = BTreeSet::new();
    collect_deleted(all_values, update, &Path::root(), &mut deleted);
    deleted
}

fn collect_deleted(
    current: &Map<String, Value>,
    update: &Map<String, Value>,
    parent: &Path,
    deleted: &mut BTreeSet<Path>,
) {
    for (key, current_value) in current {
        let path = parent.child(key.as_str());
        match (current_value, update.get(key)) {
            (_, None) => {
                deleted.insert(path);
            }
            (Value::Object(before), Some(Value::Object(after))) => {
                if !before.is_empty() && after.is_empty() {
                    for child in before.keys() {
                        deleted.insert(path.child(child.as_str()));
                    }
                } else {
                    collect_deleted(before, after, &path, deleted);
                }
            }
            _ => {}
        }
    }
}

/// Compute the overlay changes that turn `all_values` into `update`.
///
/// - `persisted`: current overlay contents
/// - `update`: the full desired state
/// - `all_values`: evaluated values (declarative and overlay merged)
/// - `attributes`: persistence tags, see
///   [`compute_attribute_persistence`](super::write_rules::compute_attribute_persistence)
///
/// List values follow the append convention: the stored list holds only the
/// items the declarative layer does not already provide.
pub fn calc_patches(
    persisted: &Map<String, Value>,
    update: &Map<String, Value>,
    all_values: &Map<String, Value>,
    attributes: &AttributeMap,
) -> Result<PatchPlan, PersistError> {
    let persisted_flat = flatten(persisted);
    let update_flat = flatten(update);
    let all_values_flat = flatten(all_values);
    let static_data = calculate_static_data(all_values, persisted);

    let deletes = find_deleted_paths(all_values, update);
    for path in &deletes {
        if !attributes.contains(path) {
            return Err(PersistError::UnknownDeletePath { path: path.clone() });
        }
        if !attributes.is_deletable(path) {
            return Err(PersistError::NotDeletable { path: path.clone() });
        }
    }

    let candidates: BTreeSet<&Path> = all_values_flat.keys().chain(update_flat.keys()).collect();

    let mut patches = BTreeMap::new();
    for path in candidates {
        let old = all_values_flat.get(path);
        let new = update_flat.get(path);

        // Absent and null compare equal
        if old.unwrap_or(&Value::Null) == new.unwrap_or(&Value::Null) {
            continue;
        }
        if is_under_any(path, &deletes) {
            continue;
        }
        // Removals are covered by the delete set
        let Some(new) = new else {
            continue;
        };

        validate_no_static_nulling(path, new, &static_data)?;
        validate_writeability(path, attributes)?;
        validate_type_compatibility(path, old, Some(new))?;
        validate_list_uniqueness(path, new)?;

        let value = match new {
            Value::Array(items) => {
                let static_items = list_difference(
                    as_items(old),
                    as_items(persisted_flat.get(path)),
                );
                validate_no_static_deletion(path, items, &static_items)?;
                Value::Array(list_difference(items, &static_items))
            }
            other => other.clone(),
        };
        patches.insert(path.clone(), value);
    }

    validate_patch_conflicts(patches.keys(), &deletes)?;

    debug!(
        patches = patches.len(),
        deletes = deletes.len(),
        "computed patch plan"
    );
    Ok(PatchPlan { patches, deletes })
}

fn as_items(value: Option<&Value>) -> &[Value] {
    match value {
        Some(Value::Array(items)) => items,
        _ => &[],
    }
}
