//! Cached access to flake outputs
//!
//! [`Flake`] sits between callers and an [`Evaluator`]: selectors already
//! answered by the [`FlakeCache`] are served locally, the rest are fetched
//! in one batch and inserted. The cache can be persisted per flake revision
//! so that later processes start warm.

mod evaluator;

pub use evaluator::{EvalError, Evaluator, JsonEvaluator};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clan_selector::{parse_selector, Selector, SelectorError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheError, FlakeCache};

/// Directory name under the user cache dir; bump when the file format changes.
pub const CACHE_DIR_NAME: &str = "flakes-v2";

/// Flake access errors
#[derive(Debug, thiserror::Error)]
pub enum FlakeError {
    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error("expected {expected} outputs from the evaluator, got {got}")]
    OutputCount { expected: usize, got: usize },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error("cache file {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("cache file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// On-disk form of the evaluation cache.
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    cache: CacheEntry,
}

/// File name of the cache for `revision`: SHA-256 hex of the revision.
pub fn cache_file_name(revision: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(revision.as_bytes());
    hex::encode(hasher.finalize())
}

/// A flake with a partial evaluation cache in front of its evaluator.
#[derive(Debug)]
pub struct Flake<E> {
    identifier: String,
    evaluator: E,
    cache: FlakeCache,
    cache_dir: Option<PathBuf>,
    cache_path: Option<PathBuf>,
}

impl<E: Evaluator> Flake<E> {
    pub fn new(identifier: impl Into<String>, evaluator: E, store_dir: &str) -> Self {
        Self {
            identifier: identifier.into(),
            evaluator,
            cache: FlakeCache::new(store_dir),
            cache_dir: None,
            cache_path: None,
        }
    }

    /// Persist the cache under `dir`, one file per revision. Takes effect at
    /// the next [`Flake::invalidate_cache`].
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn cache(&self) -> &FlakeCache {
        &self.cache
    }

    /// Cache file in use, if any.
    pub fn cache_path(&self) -> Option<&Path> {
        self.cache_path.as_deref()
    }

    /// Drop all cached data and switch to the cache file for `revision`,
    /// loading it if present.
    pub fn invalidate_cache(&mut self, revision: &str) {
        self.cache.clear();
        self.cache_path = self
            .cache_dir
            .as_ref()
            .map(|dir| dir.join(cache_file_name(revision)));
        debug!(flake = %self.identifier, revision, "cache invalidated");
        self.load_cache();
    }

    /// Ask the evaluator for its current revision and invalidate for it.
    /// Without a revision the cache is cleared and stays in memory only.
    pub fn refresh(&mut self) -> Result<(), FlakeError> {
        match self.evaluator.revision()? {
            Some(revision) => self.invalidate_cache(&revision),
            None => {
                self.cache.clear();
                self.cache_path = None;
                debug!(flake = %self.identifier, "cache cleared");
            }
        }
        Ok(())
    }

    /// Best effort: a missing or unreadable file leaves the cache empty.
    fn load_cache(&mut self) {
        let Some(path) = self.cache_path.clone() else {
            return;
        };
        if !path.exists() {
            return;
        }
        match read_cache_file(&path) {
            Ok(root) => {
                debug!(path = %path.display(), "loaded evaluation cache");
                self.cache = FlakeCache::from_root(root, self.cache.store_dir());
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load evaluation cache, continuing without it");
            }
        }
    }

    fn save_cache(&self) -> Result<(), FlakeError> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };
        let io_err = |source| FlakeError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = CacheFile {
            cache: self.cache.root().clone(),
        };
        let json = serde_json::to_string(&file).map_err(|source| FlakeError::Json {
            path: path.clone(),
            source,
        })?;

        // Write to temp file first
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json).map_err(io_err)?;

        // Atomic rename
        fs::rename(&temp_path, path).map_err(io_err)?;
        Ok(())
    }

    fn fetch(&mut self, selectors: Vec<Selector>) -> Result<(), FlakeError> {
        info!(
            flake = %self.identifier,
            count = selectors.len(),
            "fetching uncached selectors"
        );
        let outputs = self.evaluator.evaluate(&selectors)?;
        if outputs.len() != selectors.len() {
            return Err(FlakeError::OutputCount {
                expected: selectors.len(),
                got: outputs.len(),
            });
        }
        for (selector, value) in selectors.iter().zip(outputs) {
            if let Err(e) = self.cache.insert(value, selector) {
                // The backend contradicts what is cached; trust neither
                self.cache.clear();
                warn!(flake = %self.identifier, error = %e, "cache cleared after conflict");
                return Err(e.into());
            }
        }
        self.save_cache()
    }

    /// Make sure every selector can be answered from the cache, fetching the
    /// missing ones in a single batch.
    pub fn precache<S: AsRef<str>>(&mut self, selectors: &[S]) -> Result<(), FlakeError> {
        let parsed = selectors
            .iter()
            .map(|s| parse_selector(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let missing = self.cache.missing(&parsed);
        if missing.is_empty() {
            return Ok(());
        }
        self.fetch(missing)
    }

    /// Read `selector`, fetching it first on a cache miss.
    pub fn select(&mut self, selector: &str) -> Result<Value, FlakeError> {
        let selector = parse_selector(selector)?;
        if !self.cache.is_cached(&selector)? {
            debug!(selector = %selector, "cache miss");
            self.fetch(vec![selector.clone()])?;
        }
        Ok(self.cache.select(&selector)?)
    }
}

fn read_cache_file(path: &Path) -> Result<CacheEntry, FlakeError> {
    let contents = fs::read_to_string(path).map_err(|source| FlakeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: CacheFile = serde_json::from_str(&contents).map_err(|source| FlakeError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(file.cache)
}
