//! # droidrun-bridge - External Tool Plumbing
//!
//! Everything that shells out: the device-bridge (`adb`) tool, the Android
//! emulator binary, and the adb-backed device capability.
//!
//! Depends on [`droidrun_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Device Bridge
//! - [`DeviceBridge`] - Lists attached devices, resets the adb server, connects devices
//! - [`AdbBridge`] - [`DeviceBridge`] backed by the `adb` binary
//! - [`parse_device_list()`] - Parse `adb devices` output into a [`DeviceList`]
//!
//! ### Device Capability
//! - [`TargetDevice`] - Install / launch / liveness surface of a connected device
//! - [`AdbDevice`] - [`TargetDevice`] implemented with `adb -s <id> ...`
//!
//! ### Emulator Process
//! - [`EmulatorSpawner`] - Starts the emulator and hands back an [`EmulatorChild`]
//! - [`EmulatorProcess`] - Real spawner that supervises the `emulator` binary
//! - [`OutputFilter`] - Suppresses benign emulator chatter, prefixes the rest
//!
//! ### Tool Discovery
//! - [`ToolPaths`] - Locate `adb` and `emulator` from config, SDK env vars, or PATH

pub mod adb;
pub mod adb_device;
pub mod bridge;
pub mod device;
pub mod device_list;
pub mod emulator;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tool_paths;

// Public API re-exports
pub use adb::AdbBridge;
pub use adb_device::AdbDevice;
pub use bridge::DeviceBridge;
pub use device::{LocalTargetDevice, TargetDevice};
pub use device_list::{parse_device_list, DeviceList, DeviceListEntry};
pub use emulator::{
    EmulatorChild, EmulatorCommand, EmulatorProcess, EmulatorSpawner, OutputFilter,
};
pub use tool_paths::ToolPaths;
