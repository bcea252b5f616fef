//! Settings and preferences files in the droidrun configuration directory

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::Local;
use droidrun_core::prelude::*;
use droidrun_core::DeviceId;
use fs2::FileExt;

use super::types::{Settings, UserPreferences};

const APP_DIR: &str = "droidrun";
const CONFIG_FILENAME: &str = "config.toml";
const PREFERENCES_FILENAME: &str = "preferences.toml";
const PREFERENCES_TEMP: &str = ".preferences.toml.tmp";
const PREFERENCES_LOCK: &str = ".preferences.lock";

/// Default configuration directory (`<config_dir>/droidrun`)
pub fn default_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or_else(|| Error::config("Could not determine the configuration directory"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load settings from `config.toml`
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings(config_dir: &Path) -> Settings {
    let config_path = config_dir.join(CONFIG_FILENAME);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Create the configuration directory and a commented default `config.toml`
///
/// Never overwrites an existing file. Returns the path of `config.toml`.
pub fn init_config_dir(config_dir: &Path) -> Result<PathBuf> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir)
            .map_err(|e| Error::config(format!("Failed to create {:?}: {}", config_dir, e)))?;
        info!("Created {:?}", config_dir);
    }

    let config_path = config_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        std::fs::write(&config_path, generate_default_config())
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
        info!("Wrote default configuration to {:?}", config_path);
    }

    Ok(config_path)
}

fn generate_default_config() -> String {
    r#"# droidrun configuration

[bridge]
# adb_path = "/path/to/platform-tools/adb"   # Default: $ANDROID_HOME, then PATH
list_timeout_secs = 30

[emulator]
# emulator_path = "/path/to/emulator/emulator"
avd_name = "droidrun"       # Virtual device profile to start
default_port = 5566         # Used until a port is remembered in preferences.toml
boot_poll_secs = 2
suppress_output = ["cache.img.lock", "NSQuickDrawView"]
kill_on_exit = false        # Kill the emulator when droidrun exits

[registry]
retry_secs = 2              # Sleep between device lookups

[deploy]
wait_attempts = 120         # Give up waiting for a device after this many slices
wait_slice_secs = 1
"#
    .to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// User Preferences
// ─────────────────────────────────────────────────────────────────────────────

/// Load preferences from `preferences.toml`
///
/// Returns None if the file doesn't exist (first run) or is unreadable.
pub fn load_user_preferences(config_dir: &Path) -> Option<UserPreferences> {
    let prefs_path = config_dir.join(PREFERENCES_FILENAME);

    if !prefs_path.exists() {
        debug!("No preferences file at {:?}", prefs_path);
        return None;
    }

    match std::fs::read_to_string(&prefs_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(prefs) => Some(prefs),
            Err(e) => {
                warn!("Failed to parse {:?}: {}", prefs_path, e);
                None
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", prefs_path, e);
            None
        }
    }
}

/// Save preferences to `preferences.toml`
///
/// Uses atomic write (temp file + rename) under an exclusive lock.
pub fn save_user_preferences(config_dir: &Path, prefs: &UserPreferences) -> Result<()> {
    let _lock = lock_preferences(config_dir)?;
    write_preferences(config_dir, prefs)
}

/// Read-modify-write preferences while holding the lock
pub fn update_user_preferences<F>(config_dir: &Path, update: F) -> Result<UserPreferences>
where
    F: FnOnce(&mut UserPreferences),
{
    let _lock = lock_preferences(config_dir)?;
    let mut prefs = load_user_preferences(config_dir).unwrap_or_default();
    update(&mut prefs);
    write_preferences(config_dir, &prefs)?;
    Ok(prefs)
}

/// The emulator port to use
///
/// The first call persists `default_port`; later calls return whatever was
/// persisted, so every run reuses the same port.
pub fn resolve_emulator_port(config_dir: &Path, default_port: u16) -> Result<u16> {
    if let Some(port) = load_user_preferences(config_dir).and_then(|p| p.emulator_port) {
        return Ok(port);
    }

    let prefs = update_user_preferences(config_dir, |prefs| {
        prefs.emulator_port.get_or_insert(default_port);
    })?;
    let port = prefs.emulator_port.unwrap_or(default_port);
    info!("Using emulator port {}", port);
    Ok(port)
}

/// Remember the device a run launched on
pub fn record_last_device(config_dir: &Path, device: &DeviceId) -> Result<()> {
    update_user_preferences(config_dir, |prefs| {
        prefs.last_device = Some(device.to_string());
        prefs.last_run_at = Some(Local::now());
    })?;
    Ok(())
}

/// Exclusive lock on the preferences; released when the file is dropped
fn lock_preferences(config_dir: &Path) -> Result<File> {
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("Failed to create {:?}", config_dir))?;

    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(config_dir.join(PREFERENCES_LOCK))
        .map_err(|e| Error::config(format!("Failed to open preferences lock: {}", e)))?;

    // Blocks if another droidrun process holds the lock
    file.lock_exclusive()
        .map_err(|e| Error::config(format!("Failed to lock preferences: {}", e)))?;

    Ok(file)
}

fn write_preferences(config_dir: &Path, prefs: &UserPreferences) -> Result<()> {
    let prefs_path = config_dir.join(PREFERENCES_FILENAME);
    let temp_path = config_dir.join(PREFERENCES_TEMP);

    let header = "# Remembered by droidrun between runs\n\n";
    let content = toml::to_string_pretty(prefs)
        .map_err(|e| Error::config(format!("Failed to serialize preferences: {}", e)))?;

    // Atomic write: write to temp, then rename
    std::fs::write(&temp_path, format!("{}{}", header, content))
        .map_err(|e| Error::config(format!("Failed to write temp file: {}", e)))?;

    std::fs::rename(&temp_path, &prefs_path)
        .map_err(|e| Error::config(format!("Failed to rename temp file: {}", e)))?;

    debug!("Saved preferences to {:?}", prefs_path);
    Ok(())
}
