//! droidrun - deploy Android builds from the command line
//!
//! The binary is a thin shell over [`droidrun_app`]: it loads the
//! configuration, wires the adb-backed runtime and maps outcomes to exit codes.

pub mod commands;
pub mod console;
pub mod events;
pub mod signals;

pub use commands::{Context, RunArgs};
pub use console::ConsoleListener;
pub use events::CliEvent;
