//! Device registry
//!
//! Keeps the set of live devices in step with `adb devices` and answers
//! "give me an emulator / a hardware device" through [`LookupHandle`]s.
//!
//! All lookups run on one worker task, in the order they were requested, so
//! the device bridge is never driven from two lookups at once. A lookup
//! retries without a ceiling until it finds a device, the emulator it started
//! goes away, or its handle is cancelled.

mod lookup;
mod table;

pub use lookup::{Lookup, LookupHandle, LookupPoll};
pub use table::DeviceTable;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use droidrun_bridge::{DeviceBridge, TargetDevice};
use droidrun_core::prelude::*;
use droidrun_core::{DeviceEvent, DeviceId, DeviceKind, EmulatorState};
use futures_util::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::emulator::EmulatorController;
use crate::lister::DeviceLister;
use lookup::{CancelToken, LookupRequest};

pub(crate) type Device<B> = <B as DeviceBridge>::Device;

/// Registry tuning
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Sleep between lookup attempts
    pub retry: Duration,
    /// Kill the emulator in [`DeviceRegistry::shutdown`]
    pub kill_emulator_on_shutdown: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            retry: Duration::from_secs(2),
            kill_emulator_on_shutdown: false,
        }
    }
}

/// State shared with the lookup worker and the per-device watchers
struct Shared<B: DeviceBridge> {
    lister: Arc<DeviceLister<B>>,
    controller: Arc<EmulatorController<B>>,
    table: Mutex<DeviceTable<Device<B>>>,
    /// Disconnect watchers, one per live device
    watchers: Mutex<HashMap<DeviceId, JoinHandle<()>>>,
    /// Serializes whole refresh cycles
    refresh_gate: tokio::sync::Mutex<()>,
    retry: Duration,
}

pub struct DeviceRegistry<B: DeviceBridge> {
    shared: Arc<Shared<B>>,
    requests: mpsc::UnboundedSender<LookupRequest<Device<B>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    kill_emulator_on_shutdown: bool,
}

impl<B: DeviceBridge> DeviceRegistry<B> {
    /// Create the registry and start its lookup worker
    pub fn new(
        lister: Arc<DeviceLister<B>>,
        controller: Arc<EmulatorController<B>>,
        config: RegistryConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            lister,
            controller,
            table: Mutex::new(DeviceTable::new()),
            watchers: Mutex::new(HashMap::new()),
            refresh_gate: tokio::sync::Mutex::new(()),
            retry: config.retry,
        });

        let (requests, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(Arc::clone(&shared), rx));

        Self {
            shared,
            requests,
            worker: Mutex::new(Some(worker)),
            kill_emulator_on_shutdown: config.kill_emulator_on_shutdown,
        }
    }

    pub fn controller(&self) -> &Arc<EmulatorController<B>> {
        &self.shared.controller
    }

    /// Re-list devices and reconcile the live set with the result
    pub async fn refresh(&self) -> Result<()> {
        self.shared.refresh().await
    }

    /// Refresh, then the first live device of `kind`
    pub async fn find(&self, kind: DeviceKind) -> Result<Option<Arc<Device<B>>>> {
        self.shared.find(kind).await
    }

    /// Refresh, then every live device
    pub async fn devices(&self) -> Result<Vec<Arc<Device<B>>>> {
        self.shared.refresh().await?;
        Ok(self.shared.lock_table()?.snapshot())
    }

    /// Look for an emulator, starting one if none is running
    pub fn get_emulator(&self) -> LookupHandle<Device<B>> {
        self.lookup(DeviceKind::Emulator)
    }

    /// Look for a hardware device
    pub fn get_hardware(&self) -> LookupHandle<Device<B>> {
        self.lookup(DeviceKind::Hardware)
    }

    /// Queue a lookup on the worker
    pub fn lookup(&self, kind: DeviceKind) -> LookupHandle<Device<B>> {
        let (handle, request) = LookupHandle::new(kind);
        if self.requests.send(request).is_err() {
            // the handle reports ChannelClosed
            warn!("Device lookup requested after registry shutdown");
        }
        handle
    }

    /// Kill the device-bridge server so it restarts on next use
    ///
    /// Errors are logged; this is a recovery action.
    pub async fn kill_daemon(&self) {
        if let Err(e) = self.shared.lister.kill_server().await {
            warn!("Could not reset the device bridge: {}", e);
        }
    }

    /// Stop the worker and release every known device
    ///
    /// The device-bridge server is left running since other tools share it.
    pub async fn shutdown(&self) {
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(worker) = worker.take() {
                worker.abort();
            }
        }
        if let Ok(mut watchers) = self.shared.watchers.lock() {
            for (_, watcher) in watchers.drain() {
                watcher.abort();
            }
        }

        let devices = match self.shared.table.lock() {
            Ok(mut table) => table.drain(),
            Err(_) => Vec::new(),
        };
        info!("Releasing {} device(s)", devices.len());
        join_all(devices.iter().map(|device| device.release())).await;

        if self.kill_emulator_on_shutdown {
            self.shared.controller.kill().await;
        }
    }
}

impl<B: DeviceBridge> Shared<B> {
    fn lock_table(&self) -> Result<std::sync::MutexGuard<'_, DeviceTable<Device<B>>>> {
        self.table
            .lock()
            .map_err(|_| Error::invariant("device table lock poisoned"))
    }

    async fn refresh(self: &Arc<Self>) -> Result<()> {
        let _gate = self.refresh_gate.lock().await;
        let current: BTreeSet<DeviceId> = self.lister.list().await.into_iter().collect();

        // The whole diff is applied under one lock so readers never see half of it
        let (removed, added) = {
            let mut table = self.lock_table()?;
            let known = table.ids();

            let removed = known
                .difference(&current)
                .map(|id| table.remove(id))
                .collect::<Result<Vec<_>>>()?;

            let mut added = Vec::new();
            for id in current.difference(&known) {
                let device = Arc::new(self.lister.bridge().connect(id));
                let events = device.subscribe();
                table.add(Arc::clone(&device))?;
                added.push((device, events));
            }
            (removed, added)
        };

        for device in removed {
            info!("Device {} went away", device.id());
            self.stop_watcher(device.id());
            device.disconnected();
        }
        for (device, events) in added {
            info!("Device {} attached", device.id());
            self.start_watcher(&device, events);
        }
        Ok(())
    }

    async fn find(self: &Arc<Self>, kind: DeviceKind) -> Result<Option<Arc<Device<B>>>> {
        self.refresh().await?;
        Ok(self.lock_table()?.find(kind))
    }

    /// Forget the device when it reports its own disconnect
    fn start_watcher(self: &Arc<Self>, device: &Arc<Device<B>>, events: broadcast::Receiver<DeviceEvent>) {
        let id = device.id().clone();
        let watcher = tokio::spawn(watch_disconnect(
            Arc::downgrade(self),
            id.clone(),
            Arc::downgrade(device),
            events,
        ));
        if let Ok(mut watchers) = self.watchers.lock() {
            if let Some(previous) = watchers.insert(id, watcher) {
                previous.abort();
            }
        }
    }

    fn stop_watcher(&self, id: &DeviceId) {
        if let Ok(mut watchers) = self.watchers.lock() {
            if let Some(watcher) = watchers.remove(id) {
                watcher.abort();
            }
        }
    }

    /// The blocking part of a lookup, run on the worker
    async fn resolve(self: &Arc<Self>, kind: DeviceKind, mut cancel: CancelToken) -> Result<Lookup<Device<B>>> {
        if let Some(device) = self.find(kind).await? {
            return Ok(Lookup::Found(device));
        }

        if kind == DeviceKind::Emulator && self.controller.state() == EmulatorState::NotRunning {
            if cancel.is_cancelled() {
                return Ok(Lookup::Cancelled);
            }
            match self.controller.launch().await {
                Ok(state) => debug!("Emulator launch finished in state {}", state),
                Err(e) if e.is_invariant() => return Err(e),
                Err(e) => {
                    error!("Could not start the emulator: {}", e);
                    return Ok(Lookup::Unavailable);
                }
            }
        }

        loop {
            if cancel.is_cancelled() {
                debug!("{} lookup cancelled", kind.noun());
                return Ok(Lookup::Cancelled);
            }

            if kind == DeviceKind::Emulator && self.controller.state() == EmulatorState::NotRunning {
                error!("The emulator is not running, giving up on this lookup");
                return Ok(Lookup::Unavailable);
            }

            if let Some(device) = self.find(kind).await? {
                return Ok(Lookup::Found(device));
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }
}

async fn run_worker<B: DeviceBridge>(
    shared: Arc<Shared<B>>,
    mut requests: mpsc::UnboundedReceiver<LookupRequest<Device<B>>>,
) {
    while let Some(LookupRequest {
        kind,
        cancel,
        reply,
    }) = requests.recv().await
    {
        if cancel.is_cancelled() || reply.is_closed() {
            let _ = reply.send(Ok(Lookup::Cancelled));
            continue;
        }

        debug!("Looking up {}", kind.noun());
        let result = shared.resolve(kind, cancel).await;
        if let Err(e) = &result {
            error!("{} lookup failed: {}", kind.noun(), e);
        }
        let _ = reply.send(result);
    }
    debug!("Lookup worker stopped");
}

async fn watch_disconnect<B: DeviceBridge>(
    shared: Weak<Shared<B>>,
    id: DeviceId,
    device: Weak<Device<B>>,
    mut events: broadcast::Receiver<DeviceEvent>,
) {
    loop {
        match events.recv().await {
            Ok(DeviceEvent::Disconnected) => break,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }

    let Some(shared) = shared.upgrade() else {
        return;
    };
    let forgotten = match shared.table.lock() {
        Ok(mut table) => table.forget(&id, &device).is_some(),
        Err(_) => false,
    };
    if forgotten {
        info!("Device {} disconnected itself", id);
        if let Ok(mut watchers) = shared.watchers.lock() {
            watchers.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::EmulatorConfig;
    use droidrun_bridge::test_utils::{FakeBridge, FakeSpawner};
    use droidrun_bridge::EmulatorSpawner;

    struct Fixture {
        bridge: Arc<FakeBridge>,
        spawner: Arc<FakeSpawner>,
        registry: DeviceRegistry<FakeBridge>,
    }

    fn fixture(ids: &[&str]) -> Fixture {
        let bridge = Arc::new(FakeBridge::with_devices(ids));
        let spawner = Arc::new(FakeSpawner::new());
        let lister = Arc::new(DeviceLister::new(Arc::clone(&bridge)));
        let controller = Arc::new(EmulatorController::new(
            Arc::clone(&lister),
            Arc::clone(&spawner) as Arc<dyn EmulatorSpawner>,
            EmulatorConfig::default(),
        ));
        let registry = DeviceRegistry::new(lister, controller, RegistryConfig::default());
        Fixture {
            bridge,
            spawner,
            registry,
        }
    }

    fn ids(devices: &[Arc<Device<FakeBridge>>]) -> Vec<String> {
        devices.iter().map(|d| d.id().to_string()).collect()
    }

    #[tokio::test]
    async fn test_find_matches_kind_only() {
        let f = fixture(&["emulator-5554", "HT91MLC00031"]);

        let emulator = f.registry.find(DeviceKind::Emulator).await.unwrap().unwrap();
        let hardware = f.registry.find(DeviceKind::Hardware).await.unwrap().unwrap();

        assert!(emulator.is_emulator());
        assert!(!hardware.is_emulator());
    }

    #[tokio::test]
    async fn test_find_none_without_match() {
        let f = fixture(&["emulator-5554"]);
        assert!(f.registry.find(DeviceKind::Hardware).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_adds_and_removes() {
        let f = fixture(&["emulator-5554", "HT91MLC00031"]);
        assert_eq!(
            ids(&f.registry.devices().await.unwrap()),
            vec!["HT91MLC00031", "emulator-5554"]
        );

        f.bridge.set_devices(&["HT91MLC00031"]);
        assert_eq!(ids(&f.registry.devices().await.unwrap()), vec!["HT91MLC00031"]);

        // A refresh with an unchanged list connects nothing new
        f.registry.refresh().await.unwrap();
        assert_eq!(f.bridge.connect_calls(), 2);
    }

    #[tokio::test]
    async fn test_removed_device_is_told_it_disconnected() {
        let f = fixture(&["HT91MLC00031"]);
        f.registry.refresh().await.unwrap();
        let device = f.bridge.device("HT91MLC00031").unwrap();

        f.bridge.set_devices(&[]);
        f.registry.refresh().await.unwrap();

        assert!(!device.is_alive().await);
    }

    #[tokio::test]
    async fn test_malformed_output_empties_registry() {
        let f = fixture(&["HT91MLC00031"]);
        f.registry.refresh().await.unwrap();

        f.bridge.set_raw_output("error: protocol fault\n");
        assert!(f.registry.devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_self_disconnect_forgets_device() {
        let f = fixture(&["HT91MLC00031"]);
        f.registry.refresh().await.unwrap();
        let device = f.bridge.device("HT91MLC00031").unwrap();

        device.disconnected();

        // the watcher runs on another task
        for _ in 0..50 {
            if f.shared_len() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(f.shared_len(), 0);

        // the bridge still lists it, so the next refresh re-adds a fresh handle
        f.registry.refresh().await.unwrap();
        assert_eq!(f.shared_len(), 1);
        assert_eq!(f.bridge.connect_calls(), 2);
    }

    impl Fixture {
        fn shared_len(&self) -> usize {
            self.registry.shared.table.lock().unwrap().len()
        }
    }

    #[tokio::test]
    async fn test_emulator_lookup_resolves_immediately_when_listed() {
        let f = fixture(&["emulator-5554"]);

        let lookup = f.registry.get_emulator().wait().await.unwrap();

        assert_eq!(lookup.device().unwrap().id().as_str(), "emulator-5554");
        assert_eq!(f.spawner.spawn_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hardware_lookup_never_starts_emulator() {
        let f = fixture(&["emulator-5554"]);
        let mut handle = f.registry.get_hardware();

        for _ in 0..10 {
            assert!(matches!(
                handle.wait_timeout(Duration::from_secs(1)).await,
                LookupPoll::Pending
            ));
        }
        assert_eq!(f.spawner.spawn_count(), 0);

        f.bridge.set_devices(&["emulator-5554", "HT91MLC00031"]);
        match handle.wait().await.unwrap() {
            Lookup::Found(device) => assert_eq!(device.id().as_str(), "HT91MLC00031"),
            other => panic!("unexpected lookup result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_pending_lookup() {
        let f = fixture(&[]);
        let mut handle = f.registry.get_hardware();
        assert!(matches!(
            handle.wait_timeout(Duration::from_secs(3)).await,
            LookupPoll::Pending
        ));

        handle.cancel();

        let result = tokio::time::timeout(Duration::from_secs(3), handle.wait())
            .await
            .expect("cancellation not observed");
        assert!(result.unwrap().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookups_are_served_in_order() {
        let f = fixture(&[]);
        let first = f.registry.get_hardware();
        let second = f.registry.get_hardware();

        f.bridge.set_devices(&["HT91MLC00031"]);

        assert!(first.wait().await.unwrap().device().is_some());
        assert!(second.wait().await.unwrap().device().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_frees_the_worker() {
        let f = fixture(&[]);
        drop(f.registry.get_hardware());

        f.bridge.set_devices(&["HT91MLC00031"]);
        let lookup = tokio::time::timeout(Duration::from_secs(10), f.registry.get_hardware().wait())
            .await
            .expect("worker stuck on a dropped lookup");
        assert!(lookup.unwrap().device().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_emulator_lookup_launches_and_resolves_after_boot() {
        let f = fixture(&[]);
        let mut handle = f.registry.get_emulator();

        let mut state = f.registry.controller().subscribe();
        state
            .wait_for(|s| *s == EmulatorState::WaitingForBoot)
            .await
            .unwrap();
        assert!(matches!(
            handle.wait_timeout(Duration::from_secs(5)).await,
            LookupPoll::Pending
        ));

        f.bridge.set_devices(&["emulator-5554"]);

        match handle.wait().await.unwrap() {
            Lookup::Found(device) => assert_eq!(device.id().as_str(), "emulator-5554"),
            other => panic!("unexpected lookup result: {:?}", other),
        }
        assert_eq!(f.registry.controller().state(), EmulatorState::Running);
        assert_eq!(f.spawner.spawn_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_boot_resolves_unavailable_and_does_not_hang() {
        let f = fixture(&[]);
        let handle = f.registry.get_emulator();

        let mut state = f.registry.controller().subscribe();
        state
            .wait_for(|s| *s == EmulatorState::WaitingForBoot)
            .await
            .unwrap();
        f.spawner.exit_latest(Some(1));

        assert!(matches!(handle.wait().await.unwrap(), Lookup::Unavailable));
        assert_eq!(f.registry.controller().state(), EmulatorState::NotRunning);

        // A later lookup starts a fresh emulator instead of hanging
        let handle = f.registry.get_emulator();
        state
            .wait_for(|s| *s == EmulatorState::WaitingForBoot)
            .await
            .unwrap();
        f.bridge.set_devices(&["emulator-5554"]);
        assert!(handle.wait().await.unwrap().device().is_some());
        assert_eq!(f.spawner.spawn_count(), 2);
    }

    #[tokio::test]
    async fn test_spawn_failure_resolves_unavailable() {
        let f = fixture(&[]);
        f.spawner.set_fail(true);

        assert!(matches!(
            f.registry.get_emulator().wait().await.unwrap(),
            Lookup::Unavailable
        ));
    }

    #[tokio::test]
    async fn test_kill_daemon_calls_bridge() {
        let f = fixture(&[]);
        f.registry.kill_daemon().await;
        assert_eq!(f.bridge.kill_server_calls(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_devices_and_keeps_daemon() {
        let f = fixture(&["emulator-5554", "HT91MLC00031"]);
        f.registry.refresh().await.unwrap();

        f.registry.shutdown().await;

        assert!(f.bridge.device("emulator-5554").unwrap().released());
        assert!(f.bridge.device("HT91MLC00031").unwrap().released());
        assert_eq!(f.bridge.kill_server_calls(), 0);
        assert!(matches!(
            f.registry.get_hardware().wait().await,
            Err(Error::ChannelClosed)
        ));
    }
}
