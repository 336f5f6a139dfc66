//! clan-persist - inventory persistence for clan fleets
//!
//! A fleet's inventory is split between values declared in `.nix` files and a
//! JSON overlay that tools may edit. This crate fetches narrow slices of the
//! evaluated inventory through a partial cache and decides which parts of a
//! requested update may be written to the overlay.

pub mod cache;
pub mod config;
pub mod flake;
pub mod persist;
pub mod store;

pub use cache::{CacheError, FlakeCache};
pub use clan_selector::{parse_selector, Path, Segment, Selector, SelectorError};
pub use config::{ConfigError, EffectiveConfig, Settings};
pub use flake::{EvalError, Evaluator, Flake, FlakeError, JsonEvaluator};
pub use persist::{calc_patches, compute_attribute_persistence, AttributeMap, PatchPlan, PersistError};
pub use store::{InventoryStore, JsonFileStore, OverlayStore, StoreError};
