//! Invoking the `adb` binary

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use droidrun_core::prelude::*;
use droidrun_core::DeviceId;
use tokio::process::Command;
use tokio::time::timeout;

use crate::adb_device::AdbDevice;
use crate::bridge::DeviceBridge;

/// Default timeout for `adb devices`
pub const LIST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval at which a launched app is checked for liveness
pub const APP_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Captured output of one adb invocation
#[derive(Debug, Clone)]
pub struct AdbOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl AdbOutput {
    /// stdout followed by stderr, for tools that report on either stream
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Run adb with the given arguments and capture its output
pub async fn run_adb<I, S>(adb: &Path, args: I) -> Result<AdbOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(adb)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::AdbNotFound
            } else {
                Error::bridge(format!("Failed to run adb: {}", e))
            }
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    trace!("adb stdout: {}", stdout);
    if !stderr.is_empty() {
        trace!("adb stderr: {}", stderr);
    }

    Ok(AdbOutput {
        stdout,
        stderr,
        success: output.status.success(),
    })
}

/// [`DeviceBridge`] backed by the `adb` binary
#[derive(Debug, Clone)]
pub struct AdbBridge {
    adb: PathBuf,
    list_timeout: Duration,
    app_poll_interval: Duration,
}

impl AdbBridge {
    pub fn new(adb: impl Into<PathBuf>) -> Self {
        Self {
            adb: adb.into(),
            list_timeout: LIST_TIMEOUT,
            app_poll_interval: APP_POLL_INTERVAL,
        }
    }

    pub fn with_list_timeout(mut self, list_timeout: Duration) -> Self {
        self.list_timeout = list_timeout;
        self
    }
}

impl DeviceBridge for AdbBridge {
    type Device = AdbDevice;

    async fn list_devices(&self) -> Result<String> {
        let output = timeout(self.list_timeout, run_adb(&self.adb, ["devices"]))
            .await
            .map_err(|_| Error::bridge("`adb devices` timed out"))??;

        if !output.success {
            return Err(Error::bridge(format!(
                "`adb devices` failed: {}",
                output.stderr.trim()
            )));
        }

        Ok(output.stdout)
    }

    async fn kill_server(&self) -> Result<()> {
        info!("Killing adb server");
        let output = run_adb(&self.adb, ["kill-server"]).await?;
        if !output.success {
            return Err(Error::bridge(format!(
                "`adb kill-server` failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    fn connect(&self, id: &DeviceId) -> AdbDevice {
        AdbDevice::new(id.clone(), self.adb.clone(), self.app_poll_interval)
    }
}
