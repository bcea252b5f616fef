//! End-to-end deployment scenarios against the in-memory bridge
//!
//! Every test runs on paused tokio time, so the 2-second polls and the
//! 120-slice device wait complete instantly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use droidrun_app::config::Settings;
use droidrun_app::{
    DeviceKind, EmulatorState, LookupPoll, RunListener, RunOutcome, RunRequest, RunState, Runtime,
};
use droidrun_bridge::test_utils::{device_list_output, FakeBridge, FakeSpawner};
use droidrun_bridge::{EmulatorSpawner, TargetDevice};
use droidrun_core::DeviceId;
use tempfile::{NamedTempFile, TempDir};

/// Records everything the deployer reports
#[derive(Default)]
struct RecordingListener {
    progress: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    /// Report cancellation from this poll on (1-based); 0 = never
    cancel_at: usize,
    polls: AtomicUsize,
    stops: AtomicUsize,
}

impl RecordingListener {
    fn cancelling_at(poll: usize) -> Self {
        Self {
            cancel_at: poll,
            ..Default::default()
        }
    }

    fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    fn progress(&self) -> Vec<String> {
        self.progress.lock().unwrap().clone()
    }
}

impl RunListener for RecordingListener {
    fn progress(&self, message: &str) {
        self.progress.lock().unwrap().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    fn is_cancelled(&self) -> bool {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        self.cancel_at != 0 && poll >= self.cancel_at
    }

    fn stopped(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

struct Scenario {
    bridge: Arc<FakeBridge>,
    spawner: Arc<FakeSpawner>,
    runtime: Runtime<FakeBridge>,
    apk: NamedTempFile,
    _prefs: TempDir,
}

impl Scenario {
    fn new(bridge: FakeBridge) -> Self {
        let bridge = Arc::new(bridge);
        let spawner = Arc::new(FakeSpawner::new());
        let prefs = TempDir::new().unwrap();
        let runtime = Runtime::new(
            Arc::clone(&bridge),
            Arc::clone(&spawner) as Arc<dyn EmulatorSpawner>,
            &Settings::default(),
            Some(prefs.path().to_path_buf()),
        );
        Self {
            bridge,
            spawner,
            runtime,
            apk: NamedTempFile::new().unwrap(),
            _prefs: prefs,
        }
    }

    fn request(&self, kind: DeviceKind) -> RunRequest {
        RunRequest::new(self.apk.path(), "com.example.app", "MainActivity", kind)
    }

    async fn run(&self, kind: DeviceKind, listener: &Arc<RecordingListener>) -> RunOutcome {
        self.runtime
            .deployer
            .run(&self.request(kind), Arc::clone(listener) as Arc<dyn RunListener>)
            .await
            .unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn hardware_lookup_blocks_while_emulator_is_listed() {
    let s = Scenario::new(FakeBridge::with_devices(&["emulator-5554"]));

    let mut hardware = s.runtime.registry.get_hardware();
    assert!(matches!(
        hardware.wait_timeout(Duration::from_secs(30)).await,
        LookupPoll::Pending
    ));
    hardware.cancel();

    let listener = Arc::new(RecordingListener::default());
    let outcome = s.run(DeviceKind::Emulator, &listener).await;

    assert_eq!(
        outcome,
        RunOutcome::Launched {
            device: DeviceId::new("emulator-5554"),
            kind: DeviceKind::Emulator,
        }
    );
    assert_eq!(s.spawner.spawn_count(), 0);
    assert_eq!(
        s.runtime.registry.controller().state(),
        EmulatorState::NotRunning
    );
    assert!(listener.errors().is_empty());
    assert_eq!(
        listener.progress().last().map(String::as_str),
        Some("Launched on the emulator.")
    );
}

#[tokio::test(start_paused = true)]
async fn emulator_is_launched_and_resolves_once_booted() {
    let bridge = FakeBridge::with_devices(&["emulator-5554"]);
    // nothing listed on the first lookup and the first boot poll
    bridge.queue_output(device_list_output(&[]));
    bridge.queue_output(device_list_output(&[]));
    let s = Scenario::new(bridge);

    let listener = Arc::new(RecordingListener::default());
    let outcome = s.run(DeviceKind::Emulator, &listener).await;

    assert_eq!(
        outcome,
        RunOutcome::Launched {
            device: DeviceId::new("emulator-5554"),
            kind: DeviceKind::Emulator,
        }
    );
    assert_eq!(s.spawner.spawns(), vec![("droidrun".to_string(), 5566)]);
    assert_eq!(
        s.runtime.registry.controller().state(),
        EmulatorState::Running
    );
    assert_eq!(s.bridge.device("emulator-5554").unwrap().installs(), 1);
    assert!(listener.errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn install_failure_reports_lost_connection_and_resets_once() {
    let s = Scenario::new(FakeBridge::with_devices(&["HT91MLC00031"]));
    s.bridge.set_install_ok(false);

    let listener = Arc::new(RecordingListener::default());
    let outcome = s.run(DeviceKind::Hardware, &listener).await;

    assert_eq!(outcome, RunOutcome::DeviceLost);
    assert_eq!(
        listener.errors(),
        vec!["Lost connection with device while installing. Try again.".to_string()]
    );
    assert_eq!(s.bridge.kill_server_calls(), 1);
    assert_eq!(s.runtime.deployer.state(), RunState::Idle);
}

#[tokio::test(start_paused = true)]
async fn emulator_crash_before_boot_does_not_hang_the_next_lookup() {
    let s = Scenario::new(FakeBridge::new());

    let spawner = Arc::clone(&s.spawner);
    let crash = tokio::spawn(async move {
        while spawner.spawn_count() == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        spawner.exit_latest(Some(1));
    });

    let listener = Arc::new(RecordingListener::default());
    let outcome = s.run(DeviceKind::Emulator, &listener).await;
    crash.await.unwrap();

    assert_eq!(outcome, RunOutcome::DeviceLost);
    assert_eq!(
        listener.errors(),
        vec!["Lost connection with device while launching. Try again.".to_string()]
    );
    assert_eq!(
        s.runtime.registry.controller().state(),
        EmulatorState::NotRunning
    );

    // The next request relaunches and succeeds
    s.bridge.set_devices(&["emulator-5554"]);
    s.bridge.queue_output(device_list_output(&[]));
    let listener = Arc::new(RecordingListener::default());
    let outcome = s.run(DeviceKind::Emulator, &listener).await;

    assert!(outcome.is_launched());
    assert_eq!(s.spawner.spawn_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_hardware_wait_reports_nothing() {
    let s = Scenario::new(FakeBridge::new());

    let listener = Arc::new(RecordingListener::cancelling_at(10));
    let outcome = s.run(DeviceKind::Hardware, &listener).await;

    assert_eq!(outcome, RunOutcome::Cancelled);
    assert!(listener.errors().is_empty());
    assert_eq!(s.bridge.kill_server_calls(), 0);

    // the worker let go of the cancelled lookup
    s.bridge.set_devices(&["HT91MLC00031"]);
    let listener = Arc::new(RecordingListener::default());
    assert!(s.run(DeviceKind::Hardware, &listener).await.is_launched());
}

#[tokio::test(start_paused = true)]
async fn unplugging_the_device_ends_the_run() {
    let s = Scenario::new(FakeBridge::with_devices(&["HT91MLC00031"]));

    let listener = Arc::new(RecordingListener::default());
    assert!(s.run(DeviceKind::Hardware, &listener).await.is_launched());
    assert_eq!(
        s.runtime.deployer.state(),
        RunState::Running {
            device: DeviceId::new("HT91MLC00031")
        }
    );

    s.bridge.set_devices(&[]);
    s.runtime.registry.refresh().await.unwrap();

    let mut state = s.runtime.deployer.subscribe();
    state.wait_for(|s| *s == RunState::Idle).await.unwrap();
    assert_eq!(listener.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_bridge_output_means_no_devices() {
    let bridge = FakeBridge::new();
    bridge.set_raw_output("* daemon crashed *\n");
    let s = Scenario::new(bridge);

    let devices = s.runtime.registry.devices().await.unwrap();

    assert!(devices.is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_devices_but_keeps_the_daemon() {
    let s = Scenario::new(FakeBridge::with_devices(&["HT91MLC00031", "emulator-5554"]));
    let devices = s.runtime.registry.devices().await.unwrap();
    assert_eq!(devices.len(), 2);

    s.runtime.shutdown().await;

    for device in &devices {
        assert!(s.bridge.device(device.id().as_str()).unwrap().released());
    }
    assert_eq!(s.bridge.kill_server_calls(), 0);
}
