//! Device vocabulary shared across the workspace

use serde::{Deserialize, Serialize};
use std::fmt;

/// Substring the device bridge uses in ids of software-emulated devices
const EMULATOR_MARKER: &str = "emulator";

/// Identifier of an attached device as reported by the device bridge
///
/// Ids are opaque (`emulator-5554`, `HT91MLC00031`, ...). An id containing
/// `"emulator"` denotes an emulator, anything else is hardware.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id belongs to an emulator
    pub fn is_emulator(&self) -> bool {
        self.0.contains(EMULATOR_MARKER)
    }

    /// The kind of device this id denotes
    pub fn kind(&self) -> DeviceKind {
        if self.is_emulator() {
            DeviceKind::Emulator
        } else {
            DeviceKind::Hardware
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Which kind of device a run targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Emulator,
    Hardware,
}

impl DeviceKind {
    /// Check if a device id is of this kind
    pub fn matches(self, id: &DeviceId) -> bool {
        id.kind() == self
    }

    /// Noun used in user-facing messages ("Launched on the emulator.")
    pub fn noun(self) -> &'static str {
        match self {
            DeviceKind::Emulator => "emulator",
            DeviceKind::Hardware => "device",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.noun())
    }
}

/// Lifecycle of the single tracked emulator
///
/// ```text
/// NotRunning --launch--> WaitingForBoot --boot detected--> Running
///      ^                       |                              |
///      +-------- process exits-+------------------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmulatorState {
    #[default]
    NotRunning,
    WaitingForBoot,
    Running,
}

impl fmt::Display for EmulatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EmulatorState::NotRunning => "not running",
            EmulatorState::WaitingForBoot => "waiting for boot",
            EmulatorState::Running => "running",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emulator_ids_are_detected_by_substring() {
        assert!(DeviceId::new("emulator-5554").is_emulator());
        assert!(DeviceId::new("my-emulator").is_emulator());
        assert!(!DeviceId::new("HT91MLC00031").is_emulator());
        assert!(!DeviceId::new("192.168.1.20:5555").is_emulator());
    }

    #[test]
    fn test_kind_matches() {
        let emu = DeviceId::new("emulator-5566");
        let phone = DeviceId::new("0123456789ABCDEF");

        assert!(DeviceKind::Emulator.matches(&emu));
        assert!(!DeviceKind::Emulator.matches(&phone));
        assert!(DeviceKind::Hardware.matches(&phone));
        assert!(!DeviceKind::Hardware.matches(&emu));
    }

    #[test]
    fn test_kind_noun() {
        assert_eq!(DeviceKind::Emulator.to_string(), "emulator");
        assert_eq!(DeviceKind::Hardware.to_string(), "device");
    }

    #[test]
    fn test_device_id_serializes_transparently() {
        let id = DeviceId::new("emulator-5554");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"emulator-5554\"");
    }

    #[test]
    fn test_emulator_state_default() {
        assert_eq!(EmulatorState::default(), EmulatorState::NotRunning);
        assert_eq!(EmulatorState::WaitingForBoot.to_string(), "waiting for boot");
    }
}
