//! Overlay storage and the inventory workflow on top of it
//!
//! The overlay is the JSON file holding user-made inventory changes. An
//! [`OverlayStore`] reads and writes it; [`InventoryStore`] combines it with
//! the evaluated inventory to validate and persist updates.

mod file;
mod inventory;
mod sanitize;

pub use file::{CommitHook, GitCommitHook, JsonFileStore};
pub use inventory::{InventoryStore, WriteInfo, DEFAULT_INVENTORY_KEYS};
pub use sanitize::{path_matches, sanitize, unwrap_deferred_module, DEFAULT_UNWRAP_PATHS};

use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use clan_selector::Path;
use serde_json::{Map, Value};

use crate::flake::FlakeError;
use crate::persist::PersistError;

/// Overlay storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("error decoding {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{0} must hold a JSON object")]
    NotAnObject(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("unwrap attempted at disallowed path: {0}")]
    DisallowedUnwrap(Path),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Flake(#[from] FlakeError),
}

/// Persistent home of the overlay.
pub trait OverlayStore {
    /// Current overlay contents; an overlay that does not exist yet is empty.
    fn read(&self) -> Result<Map<String, Value>, StoreError>;

    /// Replace the overlay with `content`, recording `message`.
    fn write(&self, content: &Map<String, Value>, message: &str) -> Result<(), StoreError>;
}

impl<S: OverlayStore + ?Sized> OverlayStore for &S {
    fn read(&self) -> Result<Map<String, Value>, StoreError> {
        (**self).read()
    }

    fn write(&self, content: &Map<String, Value>, message: &str) -> Result<(), StoreError> {
        (**self).write(content, message)
    }
}

/// In-memory overlay for tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    content: Mutex<Map<String, Value>>,
    messages: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new(content: Map<String, Value>) -> Self {
        Self {
            content: Mutex::new(content),
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the stored overlay
    pub fn content(&self) -> Map<String, Value> {
        self.content
            .lock()
            .map(|c| c.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Messages of every write so far, oldest first
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl OverlayStore for MemoryStore {
    fn read(&self) -> Result<Map<String, Value>, StoreError> {
        Ok(self.content())
    }

    fn write(&self, content: &Map<String, Value>, message: &str) -> Result<(), StoreError> {
        let mut guard = self
            .content
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = content.clone();
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.to_string());
        Ok(())
    }
}
