//! Deployment orchestrator
//!
//! Runs one request through "wait for device -> install -> launch -> track
//! for stop", reporting progress to a [`RunListener`].
//!
//! The wait for a device is bounded (120 one-second slices by default) and
//! polls the listener for cancellation on every slice. This is separate from
//! the registry's own retry, which has no ceiling.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use droidrun_bridge::{DeviceBridge, TargetDevice};
use droidrun_core::prelude::*;
use droidrun_core::{DeviceEvent, DeviceId, DeviceKind};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::registry::{Device, DeviceRegistry, Lookup, LookupHandle, LookupPoll};

const WAITING_FOR_DEVICE: &str = "Waiting for device to become available...";
const LOST_WHILE_LAUNCHING: &str = "Lost connection with device while launching. Try again.";
const LOST_WHILE_INSTALLING: &str = "Lost connection with device while installing. Try again.";
const COULD_NOT_START: &str = "Could not start the app.";
const GAVE_UP: &str = "Gave up waiting for the device to show up.";

/// Progress sink and cancellation source supplied by the caller
#[cfg_attr(test, mockall::automock)]
pub trait RunListener: Send + Sync {
    /// A step started or finished
    fn progress(&self, message: &str);

    /// The run failed with a user-facing message
    fn error(&self, message: &str);

    /// Polled once per wait slice
    fn is_cancelled(&self) -> bool;

    /// The launched app stopped or its device went away
    fn stopped(&self);
}

/// One deployment
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Built package to install
    pub artifact: PathBuf,
    pub package: String,
    pub entry_class: String,
    pub kind: DeviceKind,
}

impl RunRequest {
    pub fn new(
        artifact: impl Into<PathBuf>,
        package: impl Into<String>,
        entry_class: impl Into<String>,
        kind: DeviceKind,
    ) -> Self {
        Self {
            artifact: artifact.into(),
            package: package.into(),
            entry_class: entry_class.into(),
            kind,
        }
    }

    fn check_artifact(&self) -> Result<()> {
        if self.artifact.is_file() {
            Ok(())
        } else {
            Err(Error::artifact_not_found(&self.artifact))
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The app is running on `device`
    Launched { device: DeviceId, kind: DeviceKind },
    /// The listener asked to stop before a device was found
    Cancelled,
    /// No device showed up within the wait ceiling
    TimedOut,
    /// The device disappeared or refused the install
    DeviceLost,
    /// The app was installed but would not start
    LaunchFailed,
}

impl RunOutcome {
    pub fn is_launched(&self) -> bool {
        matches!(self, RunOutcome::Launched { .. })
    }
}

/// Caller-visible run indicator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Idle,
    WaitingForDevice,
    Installing,
    Launching,
    Running { device: DeviceId },
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running { .. })
    }
}

/// Bounds of the wait for a device
#[derive(Debug, Clone, Copy)]
pub struct WaitConfig {
    pub attempts: u32,
    pub slice: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            attempts: 120,
            slice: Duration::from_secs(1),
        }
    }
}

/// Result of [`Deployer::wait_for_device`]
#[derive(Debug)]
pub enum DeviceWait<D> {
    /// The lookup finished (found, unavailable or cancelled)
    Resolved(Lookup<D>),
    /// Every attempt ran out without an answer
    TimedOut,
}

pub struct Deployer<B: DeviceBridge> {
    registry: Arc<DeviceRegistry<B>>,
    wait: WaitConfig,
    state: Arc<watch::Sender<RunState>>,
    last_run: Mutex<Option<Arc<Device<B>>>>,
    stop_watch: Mutex<Option<JoinHandle<()>>>,
}

impl<B: DeviceBridge> Deployer<B> {
    pub fn new(registry: Arc<DeviceRegistry<B>>, wait: WaitConfig) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            registry,
            wait,
            state: Arc::new(state),
            last_run: Mutex::new(None),
            stop_watch: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RunState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Id of the device the last successful run launched on
    pub fn last_device(&self) -> Option<DeviceId> {
        self.last_run
            .lock()
            .ok()
            .and_then(|last| last.as_ref().map(|d| d.id().clone()))
    }

    /// Deploy `request`, reporting to `listener`
    ///
    /// Every expected ending is an [`RunOutcome`]; `Err` means the artifact is
    /// missing or something broke an invariant.
    pub async fn run(
        &self,
        request: &RunRequest,
        listener: Arc<dyn RunListener>,
    ) -> Result<RunOutcome> {
        request.check_artifact()?;

        self.stop_tracking();
        self.state.send_replace(RunState::WaitingForDevice);
        listener.progress(WAITING_FOR_DEVICE);

        let handle = self.registry.lookup(request.kind);
        let outcome = self.deploy(request, handle, listener).await;

        if !matches!(outcome, Ok(RunOutcome::Launched { .. })) {
            self.state.send_replace(RunState::Idle);
        }
        outcome
    }

    async fn deploy(
        &self,
        request: &RunRequest,
        handle: LookupHandle<Device<B>>,
        listener: Arc<dyn RunListener>,
    ) -> Result<RunOutcome> {
        let device = match self.wait_for_device(handle, listener.as_ref()).await? {
            DeviceWait::Resolved(Lookup::Found(device)) => device,
            DeviceWait::Resolved(Lookup::Cancelled) => {
                info!("Run cancelled while waiting for a device");
                return Ok(RunOutcome::Cancelled);
            }
            DeviceWait::Resolved(Lookup::Unavailable) => {
                return Ok(self.device_lost(listener.as_ref(), LOST_WHILE_LAUNCHING).await);
            }
            DeviceWait::TimedOut => {
                // a stuck adb server is the usual reason nothing shows up
                self.registry.kill_daemon().await;
                return Ok(RunOutcome::TimedOut);
            }
        };

        if !device.is_alive().await {
            return Ok(self.device_lost(listener.as_ref(), LOST_WHILE_LAUNCHING).await);
        }

        // Subscribe before installing so a disconnect during install is not missed
        let events = device.subscribe();

        self.state.send_replace(RunState::Installing);
        listener.progress(&format!("Installing app on {}", device.id()));
        if let Err(e) = device.install(&request.artifact).await {
            warn!("Install on {} failed: {}", device.id(), e);
            return Ok(self.device_lost(listener.as_ref(), LOST_WHILE_INSTALLING).await);
        }

        self.state.send_replace(RunState::Launching);
        listener.progress(&format!("Starting app on {}", device.id()));
        if let Err(e) = device.launch(&request.package, &request.entry_class).await {
            warn!("Launch on {} failed: {}", device.id(), e);
            listener.error(COULD_NOT_START);
            return Ok(RunOutcome::LaunchFailed);
        }

        let id = device.id().clone();
        let kind = id.kind();
        listener.progress(&format!("Launched on the {}.", kind.noun()));
        info!("{} launched on {}", request.package, id);

        if let Ok(mut last) = self.last_run.lock() {
            *last = Some(Arc::clone(&device));
        }
        self.state.send_replace(RunState::Running { device: id.clone() });
        self.track_stop(id.clone(), events, listener);

        Ok(RunOutcome::Launched { device: id, kind })
    }

    /// Wait for `handle` in slices, checking for cancellation before each one
    ///
    /// Gives up after [`WaitConfig::attempts`] slices. Cancelling (or giving
    /// up) also cancels the lookup so the registry worker moves on.
    pub async fn wait_for_device(
        &self,
        mut handle: LookupHandle<Device<B>>,
        listener: &dyn RunListener,
    ) -> Result<DeviceWait<Device<B>>> {
        for attempt in 1..=self.wait.attempts {
            if listener.is_cancelled() {
                handle.cancel();
                return Ok(DeviceWait::Resolved(Lookup::Cancelled));
            }

            match handle.wait_timeout(self.wait.slice).await {
                LookupPoll::Ready(Ok(lookup)) => return Ok(DeviceWait::Resolved(lookup)),
                LookupPoll::Ready(Err(e)) if e.is_invariant() => return Err(e),
                LookupPoll::Ready(Err(e)) => {
                    // reported to the user as a lost device
                    warn!("Device lookup failed: {}", e);
                    return Ok(DeviceWait::Resolved(Lookup::Unavailable));
                }
                LookupPoll::Pending => trace!("Still waiting for a device (attempt {})", attempt),
            }
        }

        handle.cancel();
        warn!(
            "No {} after {} attempts",
            handle.kind().noun(),
            self.wait.attempts
        );
        listener.error(GAVE_UP);
        Ok(DeviceWait::TimedOut)
    }

    /// Return the last-run device to its launcher
    ///
    /// Returns `false` when nothing has been launched yet.
    pub async fn stop(&self) -> Result<bool> {
        let device = self.last_run.lock().ok().and_then(|last| last.clone());
        match device {
            Some(device) => {
                info!("Bringing the launcher to the front on {}", device.id());
                device.bring_to_foreground().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn device_lost(&self, listener: &dyn RunListener, message: &str) -> RunOutcome {
        listener.error(message);
        // a wedged daemon is the usual cause of a device going stale
        self.registry.kill_daemon().await;
        RunOutcome::DeviceLost
    }

    /// Reset the run state once the launched app stops
    fn track_stop(
        &self,
        device: DeviceId,
        mut events: broadcast::Receiver<DeviceEvent>,
        listener: Arc<dyn RunListener>,
    ) {
        let state = Arc::clone(&self.state);
        let watcher = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.ends_run() => {
                        info!("Run on {} ended: {:?}", device, event);
                        break;
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            listener.stopped();
            state.send_if_modified(|s| {
                let ended = matches!(s, RunState::Running { device: running } if *running == device);
                if ended {
                    *s = RunState::Idle;
                }
                ended
            });
        });

        if let Ok(mut slot) = self.stop_watch.lock() {
            if let Some(previous) = slot.replace(watcher) {
                previous.abort();
            }
        }
    }

    fn stop_tracking(&self) {
        if let Ok(mut slot) = self.stop_watch.lock() {
            if let Some(previous) = slot.take() {
                previous.abort();
            }
        }
    }
}

impl<B: DeviceBridge> Drop for Deployer<B> {
    fn drop(&mut self) {
        self.stop_tracking();
    }
}
