//! Parsing of `adb devices` output
//!
//! Expected shape:
//!
//! ```text
//! List of devices attached
//! HT91MLC00031	device
//! emulator-5554	offline
//!
//! ```
//!
//! Only rows whose status is exactly `device` are attached and responsive.
//! The daemon start-up banner adb prints when it had to launch its server is
//! stripped first. Anything else that does not begin with the header is
//! treated as zero devices, with a warning for the caller to log.

use droidrun_core::DeviceId;

/// First line of a well-formed device list
const HEADER: &str = "List of devices";

/// Lines adb prints when it starts its server on demand
const DAEMON_BANNERS: [&str; 2] = [
    "* daemon not running",
    "* daemon started successfully",
];

/// Status of a row that is attached and responsive
const ATTACHED_STATUS: &str = "device";

/// One `id<TAB>status` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceListEntry {
    pub id: DeviceId,
    pub status: String,
}

impl DeviceListEntry {
    /// Whether the device is attached and responsive
    pub fn is_attached(&self) -> bool {
        self.status == ATTACHED_STATUS
    }
}

/// Parsed device list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceList {
    /// Every well-formed row, whatever its status
    pub entries: Vec<DeviceListEntry>,

    /// Set when the output was not recognised
    pub warning: Option<String>,
}

impl DeviceList {
    fn malformed(raw: &str) -> Self {
        Self {
            entries: Vec::new(),
            warning: Some(format!(
                "Received unfamiliar output from `adb devices`, treating it as no devices: {:?}",
                raw
            )),
        }
    }

    /// Ids of devices that are attached and responsive
    pub fn attached(&self) -> Vec<DeviceId> {
        self.entries
            .iter()
            .filter(|e| e.is_attached())
            .map(|e| e.id.clone())
            .collect()
    }
}

/// Parse the output of `adb devices`
///
/// Never fails: unrecognised output yields an empty list with
/// [`DeviceList::warning`] set.
pub fn parse_device_list(raw: &str) -> DeviceList {
    if raw.is_empty() {
        return DeviceList::default();
    }

    let mut lines = raw
        .lines()
        .filter(|line| {
            let line = line.trim();
            !DAEMON_BANNERS.iter().any(|banner| line.starts_with(banner))
        })
        .peekable();

    // Only banners: adb just started and has nothing to report yet
    if lines.peek().is_none() {
        return DeviceList::default();
    }

    let header = lines.next().map(str::trim).unwrap_or_default();
    if !header.starts_with(HEADER) {
        return DeviceList::malformed(raw);
    }

    let mut entries = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        match line.split_once('\t') {
            Some((id, status)) if !id.trim().is_empty() => entries.push(DeviceListEntry {
                id: DeviceId::new(id.trim()),
                status: status.trim().to_string(),
            }),
            _ => tracing::debug!("Ignoring unknown `adb devices` row: {:?}", line),
        }
    }

    DeviceList {
        entries,
        warning: None,
    }
}
