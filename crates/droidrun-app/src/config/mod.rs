//! Configuration for droidrun
//!
//! Files in the configuration directory:
//! - `config.toml` - settings, all optional
//! - `preferences.toml` - state remembered between runs (emulator port, last device)

pub mod settings;
pub mod types;

pub use settings::{
    default_config_dir, init_config_dir, load_settings, load_user_preferences,
    record_last_device, resolve_emulator_port, save_user_preferences, update_user_preferences,
};
pub use types::*;
