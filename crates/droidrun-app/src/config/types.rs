//! Configuration types for droidrun
//!
//! Defines:
//! - `Settings` - contents of `config.toml`
//! - `UserPreferences` - state persisted across runs in `preferences.toml`

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use droidrun_bridge::emulator::DEFAULT_SUPPRESSED_OUTPUT;
use serde::{Deserialize, Serialize};

/// Virtual device profile started when no name is configured
pub const DEFAULT_AVD_NAME: &str = "droidrun";

/// Console port used for the emulator the first time one is launched
pub const DEFAULT_EMULATOR_PORT: u16 = 5566;

/// Application settings (`config.toml`)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub bridge: BridgeSettings,

    #[serde(default)]
    pub emulator: EmulatorSettings,

    #[serde(default)]
    pub registry: RegistrySettings,

    #[serde(default)]
    pub deploy: DeploySettings,
}

/// `[bridge]` - the adb tool
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeSettings {
    /// Explicit path to `adb` (empty = search the SDK and PATH)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adb_path: Option<PathBuf>,

    /// Timeout for one `adb devices` invocation
    #[serde(default = "default_list_timeout_secs")]
    pub list_timeout_secs: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            adb_path: None,
            list_timeout_secs: default_list_timeout_secs(),
        }
    }
}

impl BridgeSettings {
    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs)
    }
}

/// `[emulator]` - the emulator process
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmulatorSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emulator_path: Option<PathBuf>,

    /// Virtual device profile to start
    #[serde(default = "default_avd_name")]
    pub avd_name: String,

    /// Port used until one has been persisted in preferences
    #[serde(default = "default_port")]
    pub default_port: u16,

    /// Interval between boot checks
    #[serde(default = "default_poll_secs")]
    pub boot_poll_secs: u64,

    /// Emulator output lines containing any of these are not logged
    #[serde(default = "default_suppress_output")]
    pub suppress_output: Vec<String>,

    /// Kill the emulator when droidrun shuts down
    #[serde(default)]
    pub kill_on_exit: bool,
}

impl Default for EmulatorSettings {
    fn default() -> Self {
        Self {
            emulator_path: None,
            avd_name: default_avd_name(),
            default_port: default_port(),
            boot_poll_secs: default_poll_secs(),
            suppress_output: default_suppress_output(),
            kill_on_exit: false,
        }
    }
}

impl EmulatorSettings {
    pub fn boot_poll_interval(&self) -> Duration {
        Duration::from_secs(self.boot_poll_secs)
    }
}

/// `[registry]` - device lookups
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistrySettings {
    /// Sleep between lookup attempts
    #[serde(default = "default_poll_secs")]
    pub retry_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            retry_secs: default_poll_secs(),
        }
    }
}

impl RegistrySettings {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }
}

/// `[deploy]` - the bounded wait for a device
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeploySettings {
    #[serde(default = "default_wait_attempts")]
    pub wait_attempts: u32,

    #[serde(default = "default_wait_slice_secs")]
    pub wait_slice_secs: u64,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            wait_attempts: default_wait_attempts(),
            wait_slice_secs: default_wait_slice_secs(),
        }
    }
}

impl DeploySettings {
    pub fn wait_slice(&self) -> Duration {
        Duration::from_secs(self.wait_slice_secs)
    }
}

fn default_list_timeout_secs() -> u64 {
    30
}

fn default_avd_name() -> String {
    DEFAULT_AVD_NAME.to_string()
}

fn default_port() -> u16 {
    DEFAULT_EMULATOR_PORT
}

fn default_poll_secs() -> u64 {
    2
}

fn default_suppress_output() -> Vec<String> {
    DEFAULT_SUPPRESSED_OUTPUT
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_wait_attempts() -> u32 {
    120
}

fn default_wait_slice_secs() -> u64 {
    1
}

/// State remembered between runs (`preferences.toml`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct UserPreferences {
    /// Emulator console port, fixed the first time an emulator is launched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emulator_port: Option<u16>,

    /// Device the last successful run launched on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_device: Option<String>,

    /// When that run happened
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Local>>,
}
