//! Configuration system for Custos.
//!
//! Provides TOML-based configuration with:
//! - Session lifecycle settings (`[session]`): idle timeout, validation
//!   scheduler, deletion of invalid sessions
//! - Store selection (`[store]`): in-memory map or cache-only store
//! - Config file layering (user config dir + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    CONFIG_DIR_ENV, ConfigSource, LoadedConfig, PROJECT_CONFIG_FILE, USER_CONFIG_FILE,
    load_config, load_config_file, load_config_with_options, save_config, xdg_config_dir,
    xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
