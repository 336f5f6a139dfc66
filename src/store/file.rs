//! JSON file overlay

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{OverlayStore, StoreError};

/// Runs after every successful overlay write, typically to commit the file.
pub trait CommitHook {
    fn commit(&self, file: &Path, message: &str) -> Result<(), StoreError>;
}

/// Commits the overlay file with `git` in its directory.
#[derive(Debug, Clone, Default)]
pub struct GitCommitHook;

impl GitCommitHook {
    fn git(dir: &Path, args: &[&str]) -> Result<(), StoreError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .map_err(|e| StoreError::Commit(format!("failed to run git: {}", e)))?;
        if !output.status.success() {
            return Err(StoreError::Commit(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl CommitHook for GitCommitHook {
    fn commit(&self, file: &Path, message: &str) -> Result<(), StoreError> {
        let dir = file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::Commit(format!("bad file name: {}", file.display())))?;

        Self::git(dir, &["add", "--", name])?;
        Self::git(dir, &["commit", "--quiet", "-m", message, "--", name])?;
        info!(file = %file.display(), "committed overlay");
        Ok(())
    }
}

/// Overlay kept as a pretty-printed JSON file.
pub struct JsonFileStore {
    path: PathBuf,
    hook: Option<Box<dyn CommitHook>>,
}

impl fmt::Debug for JsonFileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonFileStore")
            .field("path", &self.path)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            hook: None,
        }
    }

    pub fn with_commit_hook(mut self, hook: impl CommitHook + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self) -> impl Fn(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl OverlayStore for JsonFileStore {
    fn read(&self) -> Result<Map<String, Value>, StoreError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no overlay file yet");
            return Ok(Map::new());
        }
        let contents = fs::read_to_string(&self.path).map_err(self.io_err())?;
        let value: Value = serde_json::from_str(&contents).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(StoreError::NotAnObject(self.path.display().to_string())),
        }
    }

    fn write(&self, content: &Map<String, Value>, message: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(self.io_err())?;
        }
        let mut json = serde_json::to_string_pretty(content).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        json.push('\n');

        // Write to temp file first
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, json).map_err(self.io_err())?;

        // Atomic rename
        fs::rename(&temp_path, &self.path).map_err(self.io_err())?;
        debug!(path = %self.path.display(), keys = content.len(), "overlay written");

        if let Some(hook) = &self.hook {
            hook.commit(&self.path, message)?;
        }
        Ok(())
    }
}
