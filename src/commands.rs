//! Command handlers behind the `droidrun` CLI

use std::path::{Path, PathBuf};
use std::sync::Arc;

use droidrun_app::config::{self, Settings};
use droidrun_app::{DeviceKind, EmulatorState, RunListener, RunOutcome, RunRequest, Runtime};
use droidrun_bridge::{
    AdbBridge, DeviceBridge, EmulatorChild, EmulatorCommand, EmulatorProcess, EmulatorSpawner,
    TargetDevice, ToolPaths,
};
use droidrun_core::prelude::*;

use crate::console::ConsoleListener;
use crate::events::CliEvent;
use crate::signals::spawn_signal_handler;

/// Configuration shared by every command
#[derive(Debug, Clone)]
pub struct Context {
    pub config_dir: PathBuf,
    pub settings: Settings,
    pub json: bool,
}

impl Context {
    /// Load settings from `config_dir`, or from the default directory
    pub fn load(config_dir: Option<PathBuf>, json: bool) -> Result<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => config::default_config_dir()?,
        };
        let settings = config::load_settings(&config_dir);
        Ok(Self {
            config_dir,
            settings,
            json,
        })
    }

    fn say(&self, message: &str) {
        if self.json {
            CliEvent::progress(message).emit();
        } else {
            eprintln!("{}", message);
        }
    }
}

/// Used when no `emulator` binary was found; only emulator lookups fail
struct MissingEmulator;

impl EmulatorSpawner for MissingEmulator {
    fn spawn(&self, _avd: &str, _port: u16) -> Result<EmulatorChild> {
        Err(Error::EmulatorNotFound)
    }
}

/// Build the adb-backed runtime from the context's settings
pub fn adb_runtime(ctx: &Context) -> Result<Runtime<AdbBridge>> {
    let paths = ToolPaths::locate(
        ctx.settings.bridge.adb_path.as_deref(),
        ctx.settings.emulator.emulator_path.as_deref(),
    )?;
    info!("Using adb at {}", paths.adb.display());

    let bridge =
        Arc::new(AdbBridge::new(&paths.adb).with_list_timeout(ctx.settings.bridge.list_timeout()));

    let spawner: Arc<dyn EmulatorSpawner> = match &paths.emulator {
        Some(emulator) => Arc::new(EmulatorProcess::new(
            EmulatorCommand::new(emulator)
                .with_suppressed_output(ctx.settings.emulator.suppress_output.clone()),
        )),
        None => {
            warn!("No emulator binary found; emulator runs are disabled");
            Arc::new(MissingEmulator)
        }
    };

    Ok(Runtime::new(
        bridge,
        spawner,
        &ctx.settings,
        Some(ctx.config_dir.clone()),
    ))
}

/// `droidrun devices`
pub async fn devices<B: DeviceBridge>(ctx: &Context, runtime: &Runtime<B>) -> Result<()> {
    let devices = runtime.registry.devices().await?;

    if ctx.json {
        for device in &devices {
            CliEvent::device(device.id()).emit();
        }
    } else if devices.is_empty() {
        eprintln!("No devices attached.");
    } else {
        for device in &devices {
            println!("{:<10} {}", device.id().kind().to_string(), device.id());
        }
    }
    Ok(())
}

/// Arguments of `droidrun run`
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub apk: PathBuf,
    pub package: String,
    pub entry_class: String,
    pub kind: DeviceKind,
    pub follow: bool,
}

/// `droidrun run`
///
/// Returns the outcome so the caller can pick the exit code.
pub async fn run<B: DeviceBridge>(
    ctx: &Context,
    runtime: &Runtime<B>,
    args: &RunArgs,
) -> Result<RunOutcome> {
    let request = RunRequest::new(&args.apk, &args.package, &args.entry_class, args.kind);
    let listener = Arc::new(ConsoleListener::new(ctx.json));

    let cancel = Arc::clone(&listener);
    let signals = spawn_signal_handler(move || cancel.cancel());

    let outcome = runtime
        .deployer
        .run(&request, Arc::clone(&listener) as Arc<dyn RunListener>)
        .await;
    signals.abort();
    let outcome = outcome?;

    if ctx.json {
        CliEvent::outcome(&outcome).emit();
    }

    if let RunOutcome::Launched { device, .. } = &outcome {
        if let Err(e) = config::record_last_device(&ctx.config_dir, device) {
            warn!("Could not remember the last device: {}", e);
        }

        // An emulator this process started dies with it
        let owns_emulator = runtime.registry.controller().state() != EmulatorState::NotRunning;
        if args.follow || owns_emulator {
            follow(ctx, runtime, &listener).await?;
        }
    }

    Ok(outcome)
}

/// Stay in the foreground until the app stops or a signal arrives
async fn follow<B: DeviceBridge>(
    ctx: &Context,
    runtime: &Runtime<B>,
    listener: &ConsoleListener,
) -> Result<()> {
    ctx.say("Press Ctrl+C to stop.");

    let (tx, rx) = tokio::sync::oneshot::channel();
    let signals = spawn_signal_handler(move || {
        let _ = tx.send(());
    });

    tokio::select! {
        _ = listener.wait_stopped() => {}
        Ok(()) = rx => {
            // mirror closing the editor: return the device to its launcher
            runtime.deployer.stop().await?;
        }
    }
    signals.abort();
    Ok(())
}

/// `droidrun emulator`
///
/// Starts the emulator, then keeps it alive until it exits or a signal arrives.
pub async fn emulator<B: DeviceBridge>(ctx: &Context, runtime: &Runtime<B>) -> Result<EmulatorState> {
    let controller = runtime.registry.controller();
    if controller.state() != EmulatorState::NotRunning {
        return Ok(controller.state());
    }

    ctx.say(&format!(
        "Starting emulator {}...",
        ctx.settings.emulator.avd_name
    ));

    let (tx, mut rx) = tokio::sync::oneshot::channel();
    let signals = spawn_signal_handler(move || {
        let _ = tx.send(());
    });

    let state = tokio::select! {
        state = controller.launch() => state?,
        Ok(()) = &mut rx => {
            controller.kill().await;
            signals.abort();
            return Ok(controller.state());
        }
    };
    report_emulator(ctx, state);

    if state == EmulatorState::Running {
        ctx.say("Press Ctrl+C to close the emulator.");
        let mut changes = controller.subscribe();
        tokio::select! {
            _ = changes.wait_for(|s| *s == EmulatorState::NotRunning) => {}
            Ok(()) = &mut rx => controller.kill().await,
        }
        report_emulator(ctx, controller.state());
    }
    signals.abort();

    Ok(controller.state())
}

fn report_emulator(ctx: &Context, state: EmulatorState) {
    if ctx.json {
        CliEvent::emulator(state).emit();
    } else {
        eprintln!("Emulator: {}", state);
    }
}

/// `droidrun kill-daemon`
pub async fn kill_daemon<B: DeviceBridge>(ctx: &Context, runtime: &Runtime<B>) {
    runtime.registry.kill_daemon().await;
    ctx.say("Device bridge server reset.");
}

/// `droidrun init`
pub fn init(config_dir: &Path) -> Result<PathBuf> {
    config::init_config_dir(config_dir)
}
