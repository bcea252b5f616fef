//! Emulator process management
//!
//! [`EmulatorProcess`] spawns `emulator -avd <name> -port <port> -no-boot-anim`
//! and supervises it the same way for every caller:
//!
//! - stdout/stderr are read line by line, benign chatter is dropped and the
//!   rest is forwarded to the log with the emulator's title as prefix
//! - a dedicated wait task owns the `Child`, selects between natural exit and
//!   a kill request, and reports the exit code over a oneshot channel
//!
//! Callers only see an [`EmulatorChild`], which is also trivially built from
//! channels in tests.

use std::path::PathBuf;
use std::process::Stdio;

use droidrun_core::prelude::*;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

/// Line fragments the emulator prints that never indicate a real problem
pub const DEFAULT_SUPPRESSED_OUTPUT: [&str; 2] = [
    // left behind when a previous emulator was killed; the emulator cleans it up
    "cache.img.lock",
    // macOS deprecation warning printed on every start
    "NSQuickDrawView",
];

/// A running (or just exited) emulator, as seen by its owner
#[derive(Debug)]
pub struct EmulatorChild {
    /// Process ID for logging
    pub pid: Option<u32>,
    /// Resolves with the exit code once the process is gone
    pub exited: oneshot::Receiver<Option<i32>>,
    /// Send (or drop) to force-kill the process
    pub kill: oneshot::Sender<()>,
}

/// Starts emulator processes
pub trait EmulatorSpawner: Send + Sync {
    /// Start the emulator for `avd` listening on `port`
    fn spawn(&self, avd: &str, port: u16) -> Result<EmulatorChild>;
}

/// Filters emulator output before it reaches the log
#[derive(Debug, Clone)]
pub struct OutputFilter {
    title: String,
    suppressed: Vec<String>,
}

impl OutputFilter {
    pub fn new(title: impl Into<String>, suppressed: Vec<String>) -> Self {
        Self {
            title: title.into(),
            suppressed,
        }
    }

    /// Title prefix used for forwarded lines
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the line to log, or `None` if it is known noise
    pub fn apply(&self, line: &str) -> Option<String> {
        if line.trim().is_empty() {
            return None;
        }
        if self.suppressed.iter().any(|s| line.contains(s.as_str())) {
            trace!("suppressed emulator output: {}", line);
            return None;
        }
        Some(format!("{}: {}", self.title, line))
    }
}

/// How to invoke the emulator binary
#[derive(Debug, Clone)]
pub struct EmulatorCommand {
    /// Path to the `emulator` binary
    pub program: PathBuf,
    /// Fragments of output lines to drop
    pub suppressed_output: Vec<String>,
}

impl EmulatorCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            suppressed_output: DEFAULT_SUPPRESSED_OUTPUT
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn with_suppressed_output(mut self, suppressed: Vec<String>) -> Self {
        self.suppressed_output = suppressed;
        self
    }

    /// Argument vector for one launch
    pub fn args(avd: &str, port: u16) -> Vec<String> {
        vec![
            "-avd".to_string(),
            avd.to_string(),
            "-port".to_string(),
            port.to_string(),
            "-no-boot-anim".to_string(),
        ]
    }
}

/// Real [`EmulatorSpawner`] backed by the `emulator` binary
#[derive(Debug, Clone)]
pub struct EmulatorProcess {
    command: EmulatorCommand,
}

impl EmulatorProcess {
    pub fn new(command: EmulatorCommand) -> Self {
        Self { command }
    }

    /// Background task: owns `child`, waits for it to exit, reports the code.
    ///
    /// Two ways the task can end:
    /// 1. The emulator exits on its own (window closed, crash, `adb emu kill`).
    /// 2. `kill_rx` fires or its sender is dropped; we kill the child, then wait.
    async fn wait_for_exit(
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        exit_tx: oneshot::Sender<Option<i32>>,
    ) {
        let code = tokio::select! {
            result = child.wait() => match result {
                Ok(status) => {
                    info!("Emulator exited with status: {:?}", status);
                    status.code()
                }
                Err(e) => {
                    error!("Error waiting for emulator: {}", e);
                    None
                }
            },
            _ = kill_rx => {
                info!("Kill requested, terminating emulator");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill emulator: {}", e);
                }
                match child.wait().await {
                    Ok(status) => status.code(),
                    Err(e) => {
                        error!("Error waiting after kill: {}", e);
                        None
                    }
                }
            }
        };

        let _ = exit_tx.send(code);
    }

    /// Forward filtered lines from one output stream
    async fn pump<R>(stream: R, filter: OutputFilter, is_stderr: bool)
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(stream).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            if let Some(line) = filter.apply(&line) {
                if is_stderr {
                    warn!("{}", line);
                } else {
                    info!("{}", line);
                }
            }
        }

        debug!("{} output stream closed", filter.title());
    }
}

impl EmulatorSpawner for EmulatorProcess {
    fn spawn(&self, avd: &str, port: u16) -> Result<EmulatorChild> {
        let args = EmulatorCommand::args(avd, port);
        info!(
            "Spawning emulator: {} {}",
            self.command.program.display(),
            args.join(" ")
        );

        let mut child = Command::new(&self.command.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::EmulatorNotFound
                } else {
                    Error::ProcessSpawn {
                        reason: e.to_string(),
                    }
                }
            })?;

        let pid = child.id();
        info!("Emulator started with PID: {:?}", pid);

        let filter = OutputFilter::new(
            format!("emulator {}@{}", avd, port),
            self.command.suppressed_output.clone(),
        );
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(Self::pump(stdout, filter.clone(), false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(Self::pump(stderr, filter, true));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(Self::wait_for_exit(child, kill_rx, exit_tx));

        Ok(EmulatorChild {
            pid,
            exited: exit_rx,
            kill: kill_tx,
        })
    }
}
