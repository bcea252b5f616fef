//! Emulator lifecycle controller
//!
//! Owns the single emulator process and drives [`EmulatorState`]:
//!
//! ```text
//! NotRunning --launch()--> WaitingForBoot --emulator listed--> Running
//!     ^                          |                               |
//!     +--------- process exits --+-------------------------------+
//! ```
//!
//! Two tasks run per launch. The boot waiter polls the device list until an
//! emulator id shows up. The exit watcher waits for the child process and
//! unconditionally returns the state to `NotRunning`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use droidrun_bridge::{DeviceBridge, EmulatorChild, EmulatorSpawner};
use droidrun_core::prelude::*;
use droidrun_core::EmulatorState;
use tokio::sync::{oneshot, watch};

use crate::config::{resolve_emulator_port, DEFAULT_AVD_NAME, DEFAULT_EMULATOR_PORT};
use crate::lister::DeviceLister;

/// How the controller launches the emulator
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    pub avd_name: String,
    /// Port used unless one is remembered in `prefs_dir`
    pub default_port: u16,
    /// Where the chosen port is persisted (`None` = never persist)
    pub prefs_dir: Option<PathBuf>,
    pub boot_poll: Duration,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            avd_name: DEFAULT_AVD_NAME.to_string(),
            default_port: DEFAULT_EMULATOR_PORT,
            prefs_dir: None,
            boot_poll: Duration::from_secs(2),
        }
    }
}

impl EmulatorConfig {
    /// Resolve (and persist) the port off the runtime threads
    async fn port(&self) -> u16 {
        let Some(dir) = self.prefs_dir.clone() else {
            return self.default_port;
        };
        let default_port = self.default_port;
        let resolved =
            tokio::task::spawn_blocking(move || resolve_emulator_port(&dir, default_port)).await;
        match resolved {
            Ok(Ok(port)) => port,
            Ok(Err(e)) => {
                warn!("Could not persist the emulator port: {}", e);
                default_port
            }
            Err(e) => {
                warn!("Emulator port lookup failed: {}", e);
                default_port
            }
        }
    }
}

/// The live process handle, present between spawn and exit
struct RunningEmulator {
    generation: u64,
    pid: Option<u32>,
    /// Taken by [`EmulatorController::kill`]
    kill: Option<oneshot::Sender<()>>,
}

type ProcessSlot = Arc<Mutex<Option<RunningEmulator>>>;

pub struct EmulatorController<B> {
    lister: Arc<DeviceLister<B>>,
    spawner: Arc<dyn EmulatorSpawner>,
    config: EmulatorConfig,
    state: Arc<watch::Sender<EmulatorState>>,
    process: ProcessSlot,
    generation: AtomicU64,
}

impl<B: DeviceBridge> EmulatorController<B> {
    pub fn new(
        lister: Arc<DeviceLister<B>>,
        spawner: Arc<dyn EmulatorSpawner>,
        config: EmulatorConfig,
    ) -> Self {
        let (state, _) = watch::channel(EmulatorState::NotRunning);
        Self {
            lister,
            spawner,
            config,
            state: Arc::new(state),
            process: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> EmulatorState {
        *self.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<EmulatorState> {
        self.state.subscribe()
    }

    /// Start the emulator and wait until it has booted or failed
    ///
    /// Returns the state once boot waiting is over; `Running` on success,
    /// `NotRunning` if the process exited first. Calling this in any state
    /// other than `NotRunning` is an [`Error::Invariant`].
    pub async fn launch(&self) -> Result<EmulatorState> {
        self.ensure_not_running()?;
        let port = self.config.port().await;
        let done = self.spawn(port)?;
        let _ = done.await;
        Ok(self.state())
    }

    fn ensure_not_running(&self) -> Result<()> {
        let current = self.state();
        if current != EmulatorState::NotRunning {
            return Err(Error::invariant(format!(
                "emulator launch requested while {}",
                current
            )));
        }
        Ok(())
    }

    /// Spawn the process and both tasks; the receiver fires when boot waiting ends
    fn spawn(&self, port: u16) -> Result<oneshot::Receiver<()>> {
        let mut slot = self
            .process
            .lock()
            .map_err(|_| Error::invariant("emulator process lock poisoned"))?;

        self.ensure_not_running()?;
        if slot.is_some() {
            return Err(Error::invariant("emulator launch requested with a live process"));
        }

        let EmulatorChild { pid, exited, kill } =
            self.spawner.spawn(&self.config.avd_name, port)?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *slot = Some(RunningEmulator {
            generation,
            pid,
            kill: Some(kill),
        });
        self.state.send_replace(EmulatorState::WaitingForBoot);
        info!(
            "Emulator {} starting on port {} (pid {:?})",
            self.config.avd_name, port, pid
        );

        tokio::spawn(watch_exit(
            exited,
            generation,
            Arc::clone(&self.process),
            Arc::clone(&self.state),
        ));

        let (done_tx, done_rx) = oneshot::channel();
        let guard = BootWaitGuard {
            generation,
            process: Arc::clone(&self.process),
            state: Arc::clone(&self.state),
            done: Some(done_tx),
        };
        tokio::spawn(wait_for_boot(
            Arc::clone(&self.lister),
            Arc::clone(&self.state),
            self.config.boot_poll,
            guard,
        ));

        Ok(done_rx)
    }

    /// Terminate the emulator if one is running and wait for it to go away
    pub async fn kill(&self) {
        let kill = match self.process.lock() {
            Ok(mut slot) => slot.as_mut().and_then(|p| {
                info!("Killing emulator (pid {:?})", p.pid);
                p.kill.take()
            }),
            Err(_) => None,
        };

        if let Some(kill) = kill {
            let _ = kill.send(());
            let mut rx = self.state.subscribe();
            let _ = rx.wait_for(|s| *s == EmulatorState::NotRunning).await;
        }
    }
}

/// Waits for the child to exit, then releases the handle and resets the state
async fn watch_exit(
    exited: oneshot::Receiver<Option<i32>>,
    generation: u64,
    process: ProcessSlot,
    state: Arc<watch::Sender<EmulatorState>>,
) {
    let code = exited.await.ok().flatten();

    let Ok(mut slot) = process.lock() else {
        error!("Emulator process lock poisoned");
        return;
    };
    if slot.as_ref().map(|p| p.generation) != Some(generation) {
        debug!("Stale exit for emulator generation {}", generation);
        return;
    }
    *slot = None;
    state.send_replace(EmulatorState::NotRunning);
    info!("Emulator exited (code {:?})", code);
}

/// Signals boot-wait completion; reverts a stuck `WaitingForBoot` on early exit
struct BootWaitGuard {
    generation: u64,
    process: ProcessSlot,
    state: Arc<watch::Sender<EmulatorState>>,
    done: Option<oneshot::Sender<()>>,
}

impl Drop for BootWaitGuard {
    fn drop(&mut self) {
        if *self.state.borrow() == EmulatorState::WaitingForBoot {
            match self.process.lock() {
                Ok(mut slot) if slot.as_ref().map(|p| p.generation) == Some(self.generation) => {
                    warn!("Boot wait ended while still waiting, giving up on this emulator");
                    // dropping the kill sender terminates the process
                    *slot = None;
                    self.state.send_replace(EmulatorState::NotRunning);
                }
                Ok(_) => debug!("Stale boot wait for emulator generation {}", self.generation),
                Err(_) => error!("Emulator process lock poisoned"),
            }
        }
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

async fn wait_for_boot<B: DeviceBridge>(
    lister: Arc<DeviceLister<B>>,
    state: Arc<watch::Sender<EmulatorState>>,
    poll: Duration,
    _guard: BootWaitGuard,
) {
    let mut changes = state.subscribe();

    loop {
        if *changes.borrow_and_update() != EmulatorState::WaitingForBoot {
            return;
        }

        // Wake early if the process exits during the sleep
        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = changes.wait_for(|s| *s != EmulatorState::WaitingForBoot) => return,
        }

        let ids = lister.list().await;
        if let Some(id) = ids.iter().find(|id| id.is_emulator()) {
            let booted = state.send_if_modified(|s| {
                if *s == EmulatorState::WaitingForBoot {
                    *s = EmulatorState::Running;
                    true
                } else {
                    false
                }
            });
            if booted {
                info!("Emulator booted as {}", id);
            }
            return;
        }
        trace!("Emulator not listed yet");
    }
}
