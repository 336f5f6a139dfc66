//! Persistence error registry
//!
//! Every validation failure carries a stable [`ErrorCode`] and, where one
//! exists, the offending attribute path, so UIs can point at the field.

use std::collections::BTreeMap;

use clan_selector::Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable error codes for persistence failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Top-level keys without persistence priorities
    MissingPriorities,
    /// No priority on the node or any ancestor
    UndefinedPriority,
    /// No writeability tag on the path or any ancestor
    UnknownWriteability,
    /// Path is defined by the declarative layer
    NotWriteable,
    /// Path may not be removed from the overlay
    NotDeletable,
    /// Deletion of a path the attribute map does not know
    UnknownDeletePath,
    /// Update would drop declarative-only data
    StaticData,
    /// Value changes class (scalar, list, attrset)
    TypeMismatch,
    /// List contains repeated items
    DuplicateListItems,
    /// Same path both patched and deleted
    PatchConflict,
    /// Deep merge across incompatible types
    MergeTypeMismatch,
    /// Write through a non-object intermediate
    NotAnObject,
}

impl ErrorCode {
    /// Returns the string representation of the error code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingPriorities => "MISSING_PRIORITIES",
            ErrorCode::UndefinedPriority => "UNDEFINED_PRIORITY",
            ErrorCode::UnknownWriteability => "UNKNOWN_WRITEABILITY",
            ErrorCode::NotWriteable => "NOT_WRITEABLE",
            ErrorCode::NotDeletable => "NOT_DELETABLE",
            ErrorCode::UnknownDeletePath => "UNKNOWN_DELETE_PATH",
            ErrorCode::StaticData => "STATIC_DATA",
            ErrorCode::TypeMismatch => "TYPE_MISMATCH",
            ErrorCode::DuplicateListItems => "DUPLICATE_LIST_ITEMS",
            ErrorCode::PatchConflict => "PATCH_CONFLICT",
            ErrorCode::MergeTypeMismatch => "MERGE_TYPE_MISMATCH",
            ErrorCode::NotAnObject => "NOT_AN_OBJECT",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persistence errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PersistError {
    #[error(
        "persistence priorities are not defined for top-level keys: {}",
        join(.keys)
    )]
    MissingPriorities { keys: Vec<String> },

    #[error("priority for path '{path}' is not defined, cannot determine writeability")]
    UndefinedPriority { path: Path },

    #[error("cannot determine writeability for path '{path}'")]
    UnknownWriteability { path: Path },

    #[error("path '{path}' is readonly, its value is defined in a .nix file")]
    NotWriteable { path: Path },

    #[error("cannot delete path '{path}', it is set via a .nix file")]
    NotDeletable { path: Path },

    #[error("cannot delete path '{path}', it is not a known attribute")]
    UnknownDeletePath { path: Path },

    #[error("path '{path}' is readonly, {reason}")]
    StaticData { path: Path, reason: String },

    #[error("type mismatch for path '{path}': cannot update {old} with {new}")]
    TypeMismatch {
        path: Path,
        old: &'static str,
        new: &'static str,
    },

    #[error(
        "path '{path}' contains list duplicates: {}; list values must be unique",
        join_values(.duplicates)
    )]
    DuplicateListItems { path: Path, duplicates: Vec<Value> },

    #[error(
        "paths marked for deletion also have update values: {}",
        join(.paths)
    )]
    PatchConflict { paths: Vec<Path> },

    #[error("type mismatch for key '{path}': cannot merge {old} with {new}")]
    MergeTypeMismatch {
        path: Path,
        old: &'static str,
        new: &'static str,
    },

    #[error("cannot write '{path}': an intermediate value is not an object")]
    NotAnObject { path: Path },
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_values(values: &[Value]) -> String {
    join(values)
}

/// Name of a JSON value's class, for messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "attrset",
    }
}

/// Error payload for UIs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code from the registry
    pub code: String,

    /// Human-readable, single-line error message
    pub message: String,

    /// Offending attribute path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    /// Optional machine-readable details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<String, Value>>,
}

impl ErrorPayload {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            path: None,
            data: None,
        }
    }

    pub fn with_path(mut self, path: Path) -> Self {
        self.path = Some(path);
        self
    }

    /// Add machine-readable data to the error
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.get_or_insert_with(BTreeMap::new).insert(key.into(), value);
        self
    }
}

impl PersistError {
    /// Returns the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            PersistError::MissingPriorities { .. } => ErrorCode::MissingPriorities,
            PersistError::UndefinedPriority { .. } => ErrorCode::UndefinedPriority,
            PersistError::UnknownWriteability { .. } => ErrorCode::UnknownWriteability,
            PersistError::NotWriteable { .. } => ErrorCode::NotWriteable,
            PersistError::NotDeletable { .. } => ErrorCode::NotDeletable,
            PersistError::UnknownDeletePath { .. } => ErrorCode::UnknownDeletePath,
            PersistError::StaticData { .. } => ErrorCode::StaticData,
            PersistError::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            PersistError::DuplicateListItems { .. } => ErrorCode::DuplicateListItems,
            PersistError::PatchConflict { .. } => ErrorCode::PatchConflict,
            PersistError::MergeTypeMismatch { .. } => ErrorCode::MergeTypeMismatch,
            PersistError::NotAnObject { .. } => ErrorCode::NotAnObject,
        }
    }

    /// The attribute path the error is about, if it names one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            PersistError::MissingPriorities { .. } => None,
            PersistError::PatchConflict { paths } => paths.first(),
            PersistError::UndefinedPriority { path }
            | PersistError::UnknownWriteability { path }
            | PersistError::NotWriteable { path }
            | PersistError::NotDeletable { path }
            | PersistError::UnknownDeletePath { path }
            | PersistError::StaticData { path, .. }
            | PersistError::TypeMismatch { path, .. }
            | PersistError::DuplicateListItems { path, .. }
            | PersistError::MergeTypeMismatch { path, .. }
            | PersistError::NotAnObject { path } => Some(path),
        }
    }

    /// Convert to an error payload
    pub fn to_payload(&self) -> ErrorPayload {
        let mut payload = ErrorPayload::new(self.code().as_str(), self.to_string());
        if let Some(path) = self.path() {
            payload = payload.with_path(path.clone());
        }

        match self {
            PersistError::MissingPriorities { keys } => {
                payload = payload.with_data("keys", serde_json::json!(keys));
            }
            PersistError::DuplicateListItems { duplicates, .. } => {
                payload = payload.with_data("duplicates", Value::Array(duplicates.clone()));
            }
            PersistError::PatchConflict { paths } => {
                payload = payload.with_data("paths", serde_json::json!(paths));
            }
            PersistError::TypeMismatch { old, new, .. }
            | PersistError::MergeTypeMismatch { old, new, .. } => {
                payload = payload
                    .with_data("old", serde_json::json!(old))
                    .with_data("new", serde_json::json!(new));
            }
            _ => {}
        }

        payload
    }
}
