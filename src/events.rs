//! JSON event output
//!
//! With `--json` the CLI prints NDJSON (one event per line) on stdout instead
//! of human-readable text, so scripts can follow a deployment.
//!
//! ```json
//! {"event":"device","id":"emulator-5554","kind":"emulator","timestamp":1704700001000}
//! {"event":"progress","message":"Installing app on emulator-5554","timestamp":1704700002000}
//! {"event":"outcome","outcome":"launched","device":"emulator-5554","timestamp":1704700003000}
//! ```

use std::io::{self, Write};

use chrono::Utc;
use droidrun_app::RunOutcome;
use droidrun_core::{DeviceId, DeviceKind, EmulatorState};
use serde::Serialize;
use tracing::error;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CliEvent {
    /// A live device
    Device {
        id: DeviceId,
        kind: DeviceKind,
        timestamp: i64,
    },

    Progress { message: String, timestamp: i64 },

    Error { message: String, timestamp: i64 },

    /// How a `run` ended
    Outcome {
        outcome: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        device: Option<DeviceId>,
        timestamp: i64,
    },

    /// The launched app stopped
    Stopped { timestamp: i64 },

    Emulator { state: String, timestamp: i64 },
}

impl CliEvent {
    /// Write this event to stdout as one JSON line
    pub fn emit(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize event: {}", e);
                return;
            }
        };

        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write event to stdout: {}", e);
            return;
        }
        if let Err(e) = stdout.flush() {
            error!("Failed to flush stdout: {}", e);
        }
    }

    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    pub fn device(id: &DeviceId) -> Self {
        Self::Device {
            id: id.clone(),
            kind: id.kind(),
            timestamp: Self::now(),
        }
    }

    pub fn progress(message: &str) -> Self {
        Self::Progress {
            message: message.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn outcome(outcome: &RunOutcome) -> Self {
        let (name, device) = match outcome {
            RunOutcome::Launched { device, .. } => ("launched", Some(device.clone())),
            RunOutcome::Cancelled => ("cancelled", None),
            RunOutcome::TimedOut => ("timed_out", None),
            RunOutcome::DeviceLost => ("device_lost", None),
            RunOutcome::LaunchFailed => ("launch_failed", None),
        };
        Self::Outcome {
            outcome: name,
            device,
            timestamp: Self::now(),
        }
    }

    pub fn stopped() -> Self {
        Self::Stopped {
            timestamp: Self::now(),
        }
    }

    pub fn emulator(state: EmulatorState) -> Self {
        Self::Emulator {
            state: state.to_string(),
            timestamp: Self::now(),
        }
    }
}
