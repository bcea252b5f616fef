//! # droidrun-core - Core Domain Types
//!
//! Foundation crate for droidrun. Provides the device vocabulary shared by the
//! bridge and app layers, the error taxonomy, and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`DeviceId`] - Identifier reported by the device bridge
//! - [`DeviceKind`] - Emulator or hardware selector
//! - [`EmulatorState`] - Three-state emulator lifecycle
//!
//! ### Events (`events`)
//! - [`DeviceEvent`] - Notifications a connected device broadcasts
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with `fatal`, `recoverable` and `invariant` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use droidrun_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod types;

/// Prelude for common imports used throughout all droidrun crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use error::{Error, Result, ResultExt};
pub use events::DeviceEvent;
pub use types::{DeviceId, DeviceKind, EmulatorState};
