//! Priority-aware persistence for the inventory overlay
//!
//! The evaluated inventory merges values from `.nix` files with the JSON
//! overlay. This module decides which parts of a requested update may be
//! written to the overlay and computes the minimal changes that do it:
//!
//! 1. [`compute_attribute_persistence`] tags every path with what the
//!    overlay may do to it.
//! 2. [`calc_patches`] validates an update against those tags and returns a
//!    [`PatchPlan`].
//! 3. [`apply_plan`] applies the plan to the overlay contents.

mod errors;
mod merge;
mod patch_engine;
mod path_utils;
mod static_data;
mod validate;
mod write_rules;

pub use errors::{type_name, ErrorCode, ErrorPayload, PersistError};
pub use merge::merge_objects;
pub use patch_engine::{calc_patches, find_deleted_paths, DigestError, PatchPlan};
pub use path_utils::{
    apply_plan, delete_by_path, find_duplicates, flatten, get_value_by_path, is_under_any,
    list_difference, set_value_by_path,
};
pub use static_data::calculate_static_data;
pub use write_rules::{
    compute_attribute_persistence, AttributeEntry, AttributeMap, PersistenceAttribute,
    DEFAULT_INVENTORY_FILE, WRITABLE_PRIORITY_THRESHOLD,
};
