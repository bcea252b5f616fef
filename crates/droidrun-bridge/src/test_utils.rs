//! Test utilities for bridge types
//!
//! In-memory stand-ins for the device bridge, connected devices and the
//! emulator process. Enabled for this crate's tests and, for downstream
//! crates, through the `test-helpers` feature.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use droidrun_core::prelude::*;
use droidrun_core::{DeviceEvent, DeviceId};
use tokio::sync::{broadcast, oneshot};

use crate::bridge::DeviceBridge;
use crate::device::TargetDevice;
use crate::emulator::{EmulatorChild, EmulatorSpawner};

/// Render ids as `adb devices` output with every row attached
pub fn device_list_output(ids: &[&str]) -> String {
    let mut out = String::from("List of devices attached\n");
    for id in ids {
        out.push_str(id);
        out.push_str("\tdevice\n");
    }
    out.push('\n');
    out
}

// ─────────────────────────────────────────────────────────────────
// FakeBridge
// ─────────────────────────────────────────────────────────────────

/// Behaviour shared between a [`FakeBridge`] and every device it connects
#[derive(Debug)]
struct DeviceBehavior {
    install_ok: AtomicBool,
    launch_ok: AtomicBool,
}

#[derive(Debug, Default)]
struct ListScript {
    /// Played back first, one per call; `None` is a failed invocation
    queued: VecDeque<Option<String>>,
    /// Returned once the queue is empty
    steady: String,
}

/// Scripted [`DeviceBridge`]
#[derive(Debug)]
pub struct FakeBridge {
    script: Mutex<ListScript>,
    list_delay: Mutex<Duration>,
    behavior: Arc<DeviceBehavior>,
    connected: Mutex<Vec<FakeDevice>>,
    list_calls: AtomicUsize,
    kill_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for FakeBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBridge {
    /// A bridge that reports no devices
    pub fn new() -> Self {
        Self {
            script: Mutex::new(ListScript {
                queued: VecDeque::new(),
                steady: device_list_output(&[]),
            }),
            list_delay: Mutex::new(Duration::ZERO),
            behavior: Arc::new(DeviceBehavior {
                install_ok: AtomicBool::new(true),
                launch_ok: AtomicBool::new(true),
            }),
            connected: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
            kill_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// A bridge that reports `ids` as attached
    pub fn with_devices(ids: &[&str]) -> Self {
        let bridge = Self::new();
        bridge.set_devices(ids);
        bridge
    }

    /// Report `ids` from now on (after any queued outputs)
    pub fn set_devices(&self, ids: &[&str]) {
        self.set_raw_output(device_list_output(ids));
    }

    /// Report `raw` verbatim from now on (after any queued outputs)
    pub fn set_raw_output(&self, raw: impl Into<String>) {
        self.script.lock().unwrap().steady = raw.into();
    }

    /// Return `raw` for exactly one upcoming call
    pub fn queue_output(&self, raw: impl Into<String>) {
        self.script.lock().unwrap().queued.push_back(Some(raw.into()));
    }

    /// Fail exactly one upcoming call
    pub fn queue_failure(&self) {
        self.script.lock().unwrap().queued.push_back(None);
    }

    /// Make each list call take `delay`
    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    /// Whether connected devices accept installs
    pub fn set_install_ok(&self, ok: bool) {
        self.behavior.install_ok.store(ok, Ordering::SeqCst);
    }

    /// Whether connected devices accept launches
    pub fn set_launch_ok(&self, ok: bool) {
        self.behavior.launch_ok.store(ok, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn kill_server_calls(&self) -> usize {
        self.kill_calls.load(Ordering::SeqCst)
    }

    /// Highest number of list calls observed running at once
    pub fn max_concurrent_lists(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Most recently connected device with this id
    pub fn device(&self, id: &str) -> Option<FakeDevice> {
        self.connected
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|d| d.id().as_str() == id)
            .cloned()
    }

    /// How many times [`DeviceBridge::connect`] was called
    pub fn connect_calls(&self) -> usize {
        self.connected.lock().unwrap().len()
    }
}

impl DeviceBridge for FakeBridge {
    type Device = FakeDevice;

    async fn list_devices(&self) -> Result<String> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.list_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let next = {
            let mut script = self.script.lock().unwrap();
            script
                .queued
                .pop_front()
                .unwrap_or_else(|| Some(script.steady.clone()))
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        next.ok_or_else(|| Error::bridge("scripted failure"))
    }

    async fn kill_server(&self) -> Result<()> {
        self.kill_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn connect(&self, id: &DeviceId) -> FakeDevice {
        let device = FakeDevice::with_behavior(id.clone(), Arc::clone(&self.behavior));
        self.connected.lock().unwrap().push(device.clone());
        device
    }
}

// ─────────────────────────────────────────────────────────────────
// FakeDevice
// ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct FakeDeviceState {
    id: DeviceId,
    behavior: Arc<DeviceBehavior>,
    alive: AtomicBool,
    released: AtomicBool,
    installs: AtomicUsize,
    launches: AtomicUsize,
    foregrounds: AtomicUsize,
    last_artifact: Mutex<Option<PathBuf>>,
    last_launch: Mutex<Option<(String, String)>>,
    events: broadcast::Sender<DeviceEvent>,
}

/// In-memory [`TargetDevice`]; clones share state
#[derive(Debug, Clone)]
pub struct FakeDevice {
    state: Arc<FakeDeviceState>,
}

impl FakeDevice {
    /// A live device that accepts installs and launches
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self::with_behavior(
            id.into(),
            Arc::new(DeviceBehavior {
                install_ok: AtomicBool::new(true),
                launch_ok: AtomicBool::new(true),
            }),
        )
    }

    fn with_behavior(id: DeviceId, behavior: Arc<DeviceBehavior>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Arc::new(FakeDeviceState {
                id,
                behavior,
                alive: AtomicBool::new(true),
                released: AtomicBool::new(false),
                installs: AtomicUsize::new(0),
                launches: AtomicUsize::new(0),
                foregrounds: AtomicUsize::new(0),
                last_artifact: Mutex::new(None),
                last_launch: Mutex::new(None),
                events,
            }),
        }
    }

    /// Change liveness without notifying subscribers
    pub fn set_alive(&self, alive: bool) {
        self.state.alive.store(alive, Ordering::SeqCst);
    }

    /// Deliver `event` to subscribers
    pub fn emit(&self, event: DeviceEvent) {
        let _ = self.state.events.send(event);
    }

    pub fn installs(&self) -> usize {
        self.state.installs.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    pub fn foregrounds(&self) -> usize {
        self.state.foregrounds.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> bool {
        self.state.released.load(Ordering::SeqCst)
    }

    pub fn last_artifact(&self) -> Option<PathBuf> {
        self.state.last_artifact.lock().unwrap().clone()
    }

    pub fn last_launch(&self) -> Option<(String, String)> {
        self.state.last_launch.lock().unwrap().clone()
    }
}

impl TargetDevice for FakeDevice {
    fn id(&self) -> &DeviceId {
        &self.state.id
    }

    fn is_emulator(&self) -> bool {
        self.state.id.is_emulator()
    }

    async fn is_alive(&self) -> bool {
        self.state.alive.load(Ordering::SeqCst)
    }

    async fn install(&self, artifact: &Path) -> Result<()> {
        self.state.installs.fetch_add(1, Ordering::SeqCst);
        *self.state.last_artifact.lock().unwrap() = Some(artifact.to_path_buf());
        if self.state.behavior.install_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::device(self.state.id.as_str(), "install failed"))
        }
    }

    async fn launch(&self, package: &str, entry_class: &str) -> Result<()> {
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        *self.state.last_launch.lock().unwrap() =
            Some((package.to_string(), entry_class.to_string()));
        if self.state.behavior.launch_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::device(self.state.id.as_str(), "launch failed"))
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.state.events.subscribe()
    }

    fn disconnected(&self) {
        if self.state.alive.swap(false, Ordering::SeqCst) {
            self.emit(DeviceEvent::Disconnected);
        }
    }

    async fn bring_to_foreground(&self) -> Result<()> {
        self.state.foregrounds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release(&self) {
        self.state.released.store(true, Ordering::SeqCst);
    }
}

// ─────────────────────────────────────────────────────────────────
// FakeSpawner
// ─────────────────────────────────────────────────────────────────

/// [`EmulatorSpawner`] whose children exit only when told to or killed
#[derive(Debug, Default)]
pub struct FakeSpawner {
    spawns: Mutex<Vec<(String, u16)>>,
    exit_triggers: Mutex<Vec<Option<oneshot::Sender<Option<i32>>>>>,
    kills: Arc<AtomicUsize>,
    fail: AtomicBool,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following spawn fail
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of successful spawns
    pub fn spawn_count(&self) -> usize {
        self.spawns.lock().unwrap().len()
    }

    /// `(avd, port)` of every successful spawn
    pub fn spawns(&self) -> Vec<(String, u16)> {
        self.spawns.lock().unwrap().clone()
    }

    /// Number of children that were killed
    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    /// Make the most recent child exit with `code`
    pub fn exit_latest(&self, code: Option<i32>) {
        let trigger = self
            .exit_triggers
            .lock()
            .unwrap()
            .last_mut()
            .and_then(Option::take);
        if let Some(trigger) = trigger {
            let _ = trigger.send(code);
        }
    }
}

impl EmulatorSpawner for FakeSpawner {
    fn spawn(&self, avd: &str, port: u16) -> Result<EmulatorChild> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::ProcessSpawn {
                reason: "scripted failure".to_string(),
            });
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (trigger_tx, trigger_rx) = oneshot::channel::<Option<i32>>();
        let kills = Arc::clone(&self.kills);

        tokio::spawn(async move {
            let code = tokio::select! {
                code = trigger_rx => code.ok().flatten(),
                _ = kill_rx => {
                    kills.fetch_add(1, Ordering::SeqCst);
                    None
                }
            };
            let _ = exit_tx.send(code);
        });

        let mut spawns = self.spawns.lock().unwrap();
        spawns.push((avd.to_string(), port));
        self.exit_triggers.lock().unwrap().push(Some(trigger_tx));

        Ok(EmulatorChild {
            pid: Some(40_000 + spawns.len() as u32),
            exited: exit_rx,
            kill: kill_tx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_list::parse_device_list;

    #[tokio::test]
    async fn test_fake_bridge_plays_queue_then_steady_output() {
        let bridge = FakeBridge::with_devices(&["emulator-5554"]);
        bridge.queue_output("");
        bridge.queue_failure();

        assert_eq!(bridge.list_devices().await.unwrap(), "");
        assert!(bridge.list_devices().await.is_err());
        let steady = bridge.list_devices().await.unwrap();
        assert_eq!(
            parse_device_list(&steady).attached(),
            vec![DeviceId::new("emulator-5554")]
        );
        assert_eq!(bridge.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_connected_devices_follow_bridge_behavior() {
        let bridge = FakeBridge::new();
        let device = bridge.connect(&DeviceId::new("HT91MLC00031"));
        bridge.set_install_ok(false);

        assert!(device.install(Path::new("app.apk")).await.is_err());
        assert_eq!(bridge.device("HT91MLC00031").unwrap().installs(), 1);
    }

    #[tokio::test]
    async fn test_fake_device_disconnect_notifies_once() {
        let device = FakeDevice::new("emulator-5554");
        let mut events = device.subscribe();

        device.disconnected();
        device.disconnected();

        assert_eq!(events.recv().await.unwrap(), DeviceEvent::Disconnected);
        assert!(events.try_recv().is_err());
        assert!(!device.is_alive().await);
    }

    #[tokio::test]
    async fn test_fake_spawner_exit_and_kill() {
        let spawner = FakeSpawner::new();

        let child = spawner.spawn("droidrun", 5566).unwrap();
        spawner.exit_latest(Some(1));
        assert_eq!(child.exited.await.unwrap(), Some(1));

        let child = spawner.spawn("droidrun", 5566).unwrap();
        child.kill.send(()).unwrap();
        assert_eq!(child.exited.await.unwrap(), None);

        assert_eq!(spawner.spawn_count(), 2);
        assert_eq!(spawner.kill_count(), 1);
    }

    #[test]
    fn test_fake_spawner_failure() {
        let spawner = FakeSpawner::new();
        spawner.set_fail(true);
        assert!(spawner.spawn("droidrun", 5566).is_err());
        assert_eq!(spawner.spawn_count(), 0);
    }
}
