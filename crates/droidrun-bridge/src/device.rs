//! Capability surface of a connected device
//!
//! The registry and orchestrator only ever talk to devices through this trait,
//! so tests can substitute in-memory fakes.

use std::path::Path;

use droidrun_core::prelude::*;
use droidrun_core::{DeviceEvent, DeviceId};
use tokio::sync::broadcast;

/// Operations a connected device exposes
#[trait_variant::make(TargetDevice: Send)]
pub trait LocalTargetDevice {
    /// Bridge-assigned identifier
    fn id(&self) -> &DeviceId;

    /// Whether this device is an emulator
    fn is_emulator(&self) -> bool;

    /// Whether the device is still attached and responsive
    async fn is_alive(&self) -> bool;

    /// Install (or reinstall) a built package
    async fn install(&self, artifact: &Path) -> Result<()>;

    /// Start `entry_class` of `package` and begin tracking it for stop
    async fn launch(&self, package: &str, entry_class: &str) -> Result<()>;

    /// Receive stop/disconnect notifications
    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent>;

    /// Told by the registry that the bridge no longer reports this device
    fn disconnected(&self);

    /// Return the device to its launcher screen
    async fn bring_to_foreground(&self) -> Result<()>;

    /// Release background resources (teardown)
    async fn release(&self);
}
