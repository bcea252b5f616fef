//! droidrun - deploy Android builds to an emulator or a connected device
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args as ClapArgs, Parser, Subcommand};
use droidrun::commands::{self, Context, RunArgs};
use droidrun_app::DeviceKind;
use tracing::{error, info};

/// droidrun - deploy Android builds to an emulator or a connected device
#[derive(Parser, Debug)]
#[command(name = "droidrun", version)]
#[command(about = "Deploy Android builds to an emulator or a connected device", long_about = None)]
struct Args {
    /// Configuration directory (default: <config dir>/droidrun)
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Print NDJSON events on stdout instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices and running emulators
    Devices,

    /// Install and start an app
    Run(RunCommand),

    /// Start the emulator and keep it open
    Emulator,

    /// Reset the adb server
    KillDaemon,

    /// Write a default config.toml
    Init,
}

#[derive(ClapArgs, Debug)]
struct RunCommand {
    /// Built package to install
    #[arg(long, value_name = "PATH")]
    apk: PathBuf,

    /// Application package name
    #[arg(long)]
    package: String,

    /// Activity to start (a bare name is relative to the package)
    #[arg(long = "class", value_name = "CLASS")]
    entry_class: String,

    /// Run on the emulator (starting it if needed)
    #[arg(long, conflicts_with = "device")]
    emulator: bool,

    /// Run on a connected hardware device (default)
    #[arg(long)]
    device: bool,

    /// Keep running until the app stops
    #[arg(long)]
    follow: bool,
}

impl RunCommand {
    fn into_args(self) -> RunArgs {
        RunArgs {
            apk: self.apk,
            package: self.package,
            entry_class: self.entry_class,
            kind: if self.emulator {
                DeviceKind::Emulator
            } else {
                DeviceKind::Hardware
            },
            follow: self.follow,
        }
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<ExitCode> {
    color_eyre::install()?;
    let args = Args::parse();

    droidrun_core::logging::init()?;

    let ctx = Context::load(args.config_dir, args.json)?;
    info!("Configuration directory: {}", ctx.config_dir.display());

    if let Command::Init = args.command {
        let path = commands::init(&ctx.config_dir)?;
        eprintln!("Configuration at {}", path.display());
        eprintln!("Logs in {}", droidrun_core::logging::log_directory().display());
        return Ok(ExitCode::SUCCESS);
    }

    let runtime = commands::adb_runtime(&ctx)?;

    let result = match args.command {
        Command::Devices => commands::devices(&ctx, &runtime)
            .await
            .map(|()| ExitCode::SUCCESS),
        Command::Run(run) => commands::run(&ctx, &runtime, &run.into_args())
            .await
            .map(|outcome| {
                info!("Run finished: {:?}", outcome);
                if outcome.is_launched() {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                }
            }),
        Command::Emulator => commands::emulator(&ctx, &runtime)
            .await
            .map(|_| ExitCode::SUCCESS),
        Command::KillDaemon => {
            commands::kill_daemon(&ctx, &runtime).await;
            Ok(ExitCode::SUCCESS)
        }
        Command::Init => Ok(ExitCode::SUCCESS),
    };

    runtime.shutdown().await;

    if let Err(ref e) = result {
        error!("droidrun failed: {:?}", e);
    }
    Ok(result?)
}
