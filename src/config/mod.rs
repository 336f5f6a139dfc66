//! Layered configuration
//!
//! Later layers override earlier ones:
//! 1. Built-in defaults
//! 2. Host config (~/.config/clan/persist.toml)
//! 3. Repo config (<flake>/.clan/persist.toml)
//! 4. CLI flags

mod defaults;
mod effective;
mod merge;
mod settings;

pub use defaults::{BuiltinDefaults, DEFAULT_ALL_VALUES_SELECTOR, DEFAULT_PRIORITIES_SELECTOR};
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, SCHEMA_ID};
pub use merge::{deep_merge, merge_layers};
pub use settings::{
    host_config_path, repo_config_path, CacheSettings, LogFormat, LogSettings, SelectorSettings,
    Settings, HOST_CONFIG_PATH, REPO_CONFIG_PATH,
};
