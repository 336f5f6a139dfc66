//! Partial attribute cache
//!
//! Holds the parts of a lazily evaluated attribute tree that have been
//! fetched so far, keyed by selector. The cache never talks to the
//! evaluation backend itself: callers ask [`FlakeCache::missing`] which
//! selectors need fetching, insert what the backend returns, and read back
//! through [`FlakeCache::select`].

mod entry;

pub use entry::{CacheEntry, Coverage, Node, NodeKind};

use clan_selector::{parse_selector, Path, Selector, SelectorError};
use serde_json::Value;
use tracing::{debug, warn};

use entry::Walk;

/// Default location of realised store paths.
pub const DEFAULT_STORE_DIR: &str = "/nix/store";

/// Cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("attribute '{path}' not found in cache (selector '{selector}')")]
    NotFound { path: Path, selector: String },

    #[error("cache conflict at '{path}': {reason}")]
    Conflict { path: Path, reason: String },

    #[error(transparent)]
    Selector(#[from] SelectorError),
}

/// Anything that can name a selector: a parsed [`Selector`] or its string
/// form.
pub trait SelectorInput {
    fn to_selector(&self) -> Result<Selector, SelectorError>;
}

impl SelectorInput for Selector {
    fn to_selector(&self) -> Result<Selector, SelectorError> {
        Ok(self.clone())
    }
}

impl SelectorInput for str {
    fn to_selector(&self) -> Result<Selector, SelectorError> {
        parse_selector(self)
    }
}

impl SelectorInput for String {
    fn to_selector(&self) -> Result<Selector, SelectorError> {
        parse_selector(self)
    }
}

/// In-memory cache of partially evaluated flake outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct FlakeCache {
    root: CacheEntry,
    store_dir: String,
}

impl Default for FlakeCache {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_DIR)
    }
}

impl FlakeCache {
    /// Create an empty cache. Strings under `store_dir` are treated as
    /// realised store paths.
    pub fn new(store_dir: impl Into<String>) -> Self {
        let store_dir: String = store_dir.into();
        Self {
            root: CacheEntry::default(),
            store_dir: store_dir.trim_end_matches('/').to_string(),
        }
    }

    /// Rebuild a cache from a previously saved root entry.
    pub fn from_root(root: CacheEntry, store_dir: impl Into<String>) -> Self {
        let mut cache = Self::new(store_dir);
        cache.root = root;
        cache
    }

    pub fn root(&self) -> &CacheEntry {
        &self.root
    }

    pub fn store_dir(&self) -> &str {
        &self.store_dir
    }

    /// Record `value` as the backend's answer for `selector`.
    ///
    /// All or nothing: on a conflict the cache is left as it was before the
    /// call.
    pub fn insert<S: SelectorInput + ?Sized>(
        &mut self,
        value: Value,
        selector: &S,
    ) -> Result<(), CacheError> {
        let selector = selector.to_selector()?;
        let rendered = selector.to_string();
        let walk = Walk {
            store_dir: &self.store_dir,
            selector: &rendered,
        };
        debug!(selector = %rendered, "cache insert");
        let mut root = self.root.clone();
        root.insert_at(value, selector.segments(), &Path::root(), &walk)
            .map_err(|e| {
                warn!(selector = %rendered, error = %e, "cache conflict");
                e
            })?;
        self.root = root;
        Ok(())
    }

    /// True if `select` can answer `selector` without fetching.
    pub fn is_cached<S: SelectorInput + ?Sized>(&self, selector: &S) -> Result<bool, CacheError> {
        let selector = selector.to_selector()?;
        Ok(self.root.is_cached_at(selector.segments()))
    }

    /// Answer `selector` from cached data.
    pub fn select<S: SelectorInput + ?Sized>(&self, selector: &S) -> Result<Value, CacheError> {
        let selector = selector.to_selector()?;
        let rendered = selector.to_string();
        let walk = Walk {
            store_dir: &self.store_dir,
            selector: &rendered,
        };
        self.root.select_at(selector.segments(), &Path::root(), &walk)
    }

    /// The subset of `selectors` that is not cached yet, in input order,
    /// without duplicates.
    pub fn missing(&self, selectors: &[Selector]) -> Vec<Selector> {
        let mut missing: Vec<Selector> = Vec::new();
        for selector in selectors {
            if !self.root.is_cached_at(selector.segments()) && !missing.contains(selector) {
                missing.push(selector.clone());
            }
        }
        missing
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.root = CacheEntry::default();
    }
}
