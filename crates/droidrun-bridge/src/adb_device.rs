//! A device reached through `adb -s <id>`

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use droidrun_core::prelude::*;
use droidrun_core::{DeviceEvent, DeviceId};
use regex::Regex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::adb::run_adb;
use crate::device::TargetDevice;

/// Capacity of the per-device event channel
const EVENT_CAPACITY: usize = 16;

/// `adb install` reports the failure reason as `Failure [INSTALL_FAILED_...]`
static INSTALL_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Failure \[([^\]]+)\]").expect("Invalid install failure regex")
});

/// A device attached through adb
pub struct AdbDevice {
    id: DeviceId,
    adb: PathBuf,
    app_poll_interval: Duration,
    /// Cleared once the registry or the app watcher sees the device go away
    alive: Arc<AtomicBool>,
    events: broadcast::Sender<DeviceEvent>,
    /// Watches the most recently launched app for exit
    app_watch: Mutex<Option<JoinHandle<()>>>,
}

impl AdbDevice {
    pub fn new(id: DeviceId, adb: PathBuf, app_poll_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id,
            adb,
            app_poll_interval,
            alive: Arc::new(AtomicBool::new(true)),
            events,
            app_watch: Mutex::new(None),
        }
    }

    /// `adb -s <id> <args...>`
    fn device_args<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = vec!["-s", self.id.as_str()];
        full.extend_from_slice(args);
        full
    }

    fn stop_app_watch(&self) {
        if let Ok(mut slot) = self.app_watch.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    /// Poll `pidof` until the app has been seen running and then disappears
    fn start_app_watch(&self, package: &str) {
        let watcher = AppWatcher {
            id: self.id.clone(),
            adb: self.adb.clone(),
            package: package.to_string(),
            interval: self.app_poll_interval,
            alive: Arc::clone(&self.alive),
            events: self.events.clone(),
        };
        let handle = tokio::spawn(watcher.run());

        if let Ok(mut slot) = self.app_watch.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }
}

impl std::fmt::Debug for AdbDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdbDevice")
            .field("id", &self.id)
            .field("alive", &self.alive.load(Ordering::Acquire))
            .finish()
    }
}

impl TargetDevice for AdbDevice {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn is_emulator(&self) -> bool {
        self.id.is_emulator()
    }

    async fn is_alive(&self) -> bool {
        if !self.alive.load(Ordering::Acquire) {
            return false;
        }
        match run_adb(&self.adb, self.device_args(&["get-state"])).await {
            Ok(output) => output.success && output.stdout.trim() == "device",
            Err(e) => {
                debug!("get-state for {} failed: {}", self.id, e);
                false
            }
        }
    }

    async fn install(&self, artifact: &Path) -> Result<()> {
        let path = artifact.to_string_lossy();
        info!("Installing {} on {}", path, self.id);

        let output = run_adb(&self.adb, self.device_args(&["install", "-r", &*path])).await?;
        let combined = output.combined();

        if combined.contains("Success") {
            return Ok(());
        }

        let reason = INSTALL_FAILURE
            .captures(&combined)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| combined.trim().to_string());
        warn!("Install on {} failed: {}", self.id, reason);
        Err(Error::device(self.id.as_str(), format!("install failed: {}", reason)))
    }

    async fn launch(&self, package: &str, entry_class: &str) -> Result<()> {
        let component = component_name(package, entry_class);
        info!("Starting {} on {}", component, self.id);

        let output = run_adb(
            &self.adb,
            self.device_args(&[
                "shell",
                "am",
                "start",
                "-a",
                "android.intent.action.MAIN",
                "-c",
                "android.intent.category.LAUNCHER",
                "-n",
                component.as_str(),
            ]),
        )
        .await?;

        let combined = output.combined();
        if !output.success || combined.contains("Error") {
            warn!("am start on {} failed: {}", self.id, combined.trim());
            return Err(Error::device(
                self.id.as_str(),
                format!("could not start {}", component),
            ));
        }

        self.start_app_watch(package);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    fn disconnected(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            info!("Device {} disconnected", self.id);
            self.stop_app_watch();
            let _ = self.events.send(DeviceEvent::Disconnected);
        }
    }

    async fn bring_to_foreground(&self) -> Result<()> {
        let output = run_adb(
            &self.adb,
            self.device_args(&[
                "shell",
                "am",
                "start",
                "-a",
                "android.intent.action.MAIN",
                "-c",
                "android.intent.category.HOME",
            ]),
        )
        .await?;

        if !output.success {
            return Err(Error::device(
                self.id.as_str(),
                "could not return to the launcher",
            ));
        }
        Ok(())
    }

    async fn release(&self) {
        debug!("Releasing {}", self.id);
        self.stop_app_watch();
    }
}

impl Drop for AdbDevice {
    fn drop(&mut self) {
        self.stop_app_watch();
    }
}

/// Build the `am start -n` component for an entry class
///
/// A bare class name is relative to the package; a dotted name is used as is.
pub fn component_name(package: &str, entry_class: &str) -> String {
    if entry_class.contains('/') {
        entry_class.to_string()
    } else if entry_class.starts_with('.') || entry_class.contains('.') {
        format!("{}/{}", package, entry_class)
    } else {
        format!("{}/.{}", package, entry_class)
    }
}

/// Background poll that turns app exit into [`DeviceEvent::AppStopped`]
struct AppWatcher {
    id: DeviceId,
    adb: PathBuf,
    package: String,
    interval: Duration,
    alive: Arc<AtomicBool>,
    events: broadcast::Sender<DeviceEvent>,
}

impl AppWatcher {
    async fn run(self) {
        let mut seen_running = false;

        loop {
            tokio::time::sleep(self.interval).await;

            let args = ["-s", self.id.as_str(), "shell", "pidof", self.package.as_str()];
            let output = match run_adb(&self.adb, args).await {
                Ok(output) => output,
                Err(e) => {
                    warn!("Lost adb contact with {}: {}", self.id, e);
                    self.lost_device();
                    return;
                }
            };

            if output.stderr.contains("not found") || output.stderr.contains("offline") {
                self.lost_device();
                return;
            }

            let running = !output.stdout.trim().is_empty();
            if running {
                seen_running = true;
            } else if seen_running {
                info!("{} stopped on {}", self.package, self.id);
                let _ = self.events.send(DeviceEvent::AppStopped);
                return;
            }
        }
    }

    fn lost_device(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            let _ = self.events.send(DeviceEvent::Disconnected);
        }
    }
}
