//! The device-bridge seam

use std::future::Future;

use droidrun_core::prelude::*;
use droidrun_core::DeviceId;

use crate::device::TargetDevice;

/// Access to the external device-bridge tool
///
/// `list_devices` returns the raw `adb devices` text; parsing and the
/// degrade-to-empty policy live with the caller so every implementation gets
/// them for free. Implementations must tolerate being called from a single
/// task at a time only; callers serialize access.
pub trait DeviceBridge: Send + Sync + 'static {
    /// Device handle produced by [`DeviceBridge::connect`]
    type Device: TargetDevice + Send + Sync + 'static;

    /// Run the "list devices" command and return its stdout
    fn list_devices(&self) -> impl Future<Output = Result<String>> + Send;

    /// Kill the bridge server so the next command restarts it
    fn kill_server(&self) -> impl Future<Output = Result<()>> + Send;

    /// Create a handle for a newly attached device
    fn connect(&self, id: &DeviceId) -> Self::Device;
}
