//! droidrun-app - Device registry, emulator control and deployment
//!
//! Builds on the bridge crate's tool plumbing:
//! - [`DeviceLister`] serializes every device-list query
//! - [`EmulatorController`] owns the single emulator process and its boot state
//! - [`DeviceRegistry`] tracks live devices and answers emulator/hardware lookups
//! - [`Deployer`] waits for a device, installs, launches and tracks the run
//! - [`config`] loads `config.toml` and persists preferences between runs

pub mod config;
pub mod deploy;
pub mod emulator;
pub mod lister;
pub mod registry;
pub mod runtime;

// Re-export primary types
pub use deploy::{Deployer, RunListener, RunOutcome, RunRequest, RunState, WaitConfig};
pub use emulator::{EmulatorConfig, EmulatorController};
pub use lister::DeviceLister;
pub use registry::{DeviceRegistry, Lookup, LookupHandle, LookupPoll, RegistryConfig};
pub use runtime::Runtime;

// Re-export core types for the binary
pub use droidrun_core::{DeviceEvent, DeviceId, DeviceKind, EmulatorState};
