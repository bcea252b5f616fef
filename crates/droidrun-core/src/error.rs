//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ─────────────────────────────────────────────────────────────
    // External Tool Errors
    // ─────────────────────────────────────────────────────────────
    #[error("adb not found. Set ANDROID_HOME or add platform-tools to your PATH.")]
    AdbNotFound,

    #[error("Android emulator not found. Set ANDROID_HOME or configure emulator_path.")]
    EmulatorNotFound,

    #[error("Device bridge error: {message}")]
    Bridge { message: String },

    #[error("Failed to spawn process: {reason}")]
    ProcessSpawn { reason: String },

    // ─────────────────────────────────────────────────────────────
    // Device Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Device {id}: {message}")]
    Device { id: String, message: String },

    #[error("Build artifact not found: {path}")]
    ArtifactNotFound { path: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    // ─────────────────────────────────────────────────────────────
    // Internal Bugs
    // ─────────────────────────────────────────────────────────────
    #[error("Invariant violated: {message}")]
    Invariant { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn bridge(message: impl Into<String>) -> Self {
        Self::Bridge {
            message: message.into(),
        }
    }

    pub fn device(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Device {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn artifact_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ArtifactNotFound { path: path.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an [`Error::Invariant`]. These mark bugs in this crate family or
    /// its callers and are never handled internally.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Bridge { .. } | Error::Device { .. } | Error::ProcessSpawn { .. }
        )
    }

    /// Check if this error should trigger application exit
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::AdbNotFound | Error::ArtifactNotFound { .. } | Error::Invariant { .. }
        )
    }

    /// Check if this error reports a broken invariant
    pub fn is_invariant(&self) -> bool {
        matches!(self, Error::Invariant { .. })
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::bridge("garbled output");
        assert_eq!(err.to_string(), "Device bridge error: garbled output");

        let err = Error::device("emulator-5554", "install failed");
        assert_eq!(err.to_string(), "Device emulator-5554: install failed");

        assert!(Error::AdbNotFound.to_string().contains("adb not found"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_invariant_is_fatal_and_not_recoverable() {
        let err = Error::invariant("device added twice");
        assert!(err.is_invariant());
        assert!(err.is_fatal());
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("device added twice"));
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::bridge("test").is_recoverable());
        assert!(Error::device("HT91", "gone").is_recoverable());
        assert!(!Error::AdbNotFound.is_recoverable());
        assert!(!Error::bridge("test").is_invariant());
    }

    #[test]
    fn test_artifact_not_found_mentions_path() {
        let err = Error::artifact_not_found("/tmp/app-debug.apk");
        assert!(err.to_string().contains("/tmp/app-debug.apk"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_context_preserves_error() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let err = res.context("reading preferences").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
