//! Events broadcast by connected devices

/// Notification from a device to anyone subscribed to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The app launched on the device is no longer running
    AppStopped,
    /// The device went away (unplugged, emulator closed, bridge lost it)
    Disconnected,
}

impl DeviceEvent {
    /// Whether this event ends a run on the device
    pub fn ends_run(self) -> bool {
        matches!(self, DeviceEvent::AppStopped | DeviceEvent::Disconnected)
    }
}
