//! Configuration system for the formcache draft cache.
//!
//! Provides TOML-based configuration with:
//! - A `[cache]` section for the storage key layout and auto-save debounce
//! - A `[persistence]` section for TTL, cleanup cadence, staleness and quota
//! - Config file layering (user config dir + project-local overrides)
//!
//! The sections implement the capability traits from `formcache-types`, so
//! the engine can be configured without depending on this crate.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    LoadedConfig, load_config, load_config_file, load_config_with_options, save_config,
    user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
