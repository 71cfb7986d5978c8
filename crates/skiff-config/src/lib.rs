//! Configuration for the skiff runtime.
//!
//! TOML files are layered (user config, then project-local `skiff.toml`)
//! and finally overridden by `SKIFF_*` environment variables.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    CONFIG_DIR_ENV, ConfigSource, LoadedConfig, apply_env_overrides, load_config,
    load_config_file, load_config_with, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
