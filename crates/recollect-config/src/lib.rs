//! Configuration system for the Recollect fragment store.
//!
//! Provides TOML-based configuration with:
//! - `[store]` - SQLite location and write-heavy tuning
//! - `[buffer]` - write-ahead buffer batch size, flush interval and retry policy
//! - `[enrichment]` - worker count, queue capacity and task fan-out
//! - `[logging]` - console level and rotating JSON log files
//!
//! Config files are layered (user config dir, then project-local
//! `recollect.toml`); later layers override earlier ones section by section.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    CONFIG_DIR_ENV, ConfigSource, Discovery, Layer, LayerStatus, LoadedConfig, load_config,
    load_config_file, save_config, user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
