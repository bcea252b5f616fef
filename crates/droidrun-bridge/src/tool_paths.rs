//! Locating the Android SDK tools
//!
//! Lookup order for each tool:
//! 1. an explicit path from configuration
//! 2. `$ANDROID_HOME`, then `$ANDROID_SDK_ROOT`
//! 3. `PATH`

use std::path::{Path, PathBuf};

use droidrun_core::prelude::*;

/// Location of `adb` below an SDK root
const ADB_IN_SDK: [&str; 2] = ["platform-tools", "adb"];

/// Location of `emulator` below an SDK root
const EMULATOR_IN_SDK: [&str; 2] = ["emulator", "emulator"];

/// SDK root environment variables, in priority order
const SDK_ENV_VARS: [&str; 2] = ["ANDROID_HOME", "ANDROID_SDK_ROOT"];

/// Resolved tool locations
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub adb: PathBuf,

    /// `None` disables emulator launches
    pub emulator: Option<PathBuf>,
}

impl ToolPaths {
    /// Resolve both tools. A missing `adb` is fatal; a missing emulator is not.
    pub fn locate(adb_override: Option<&Path>, emulator_override: Option<&Path>) -> Result<Self> {
        let adb = find_tool("adb", &ADB_IN_SDK, adb_override).ok_or(Error::AdbNotFound)?;
        let emulator = find_tool("emulator", &EMULATOR_IN_SDK, emulator_override);

        match &emulator {
            Some(path) => debug!("Using emulator at {}", path.display()),
            None => warn!("Android emulator not found; emulator launches are disabled"),
        }
        debug!("Using adb at {}", adb.display());

        Ok(Self { adb, emulator })
    }

    /// The emulator binary, or [`Error::EmulatorNotFound`]
    pub fn require_emulator(&self) -> Result<&Path> {
        self.emulator.as_deref().ok_or(Error::EmulatorNotFound)
    }
}

fn find_tool(name: &str, in_sdk: &[&str], configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        warn!(
            "Configured {} path {} does not exist, searching elsewhere",
            name,
            path.display()
        );
    }

    for candidate in sdk_candidates(in_sdk) {
        if candidate.is_file() {
            return Some(candidate);
        }
        trace!("{} not at {}", name, candidate.display());
    }

    which::which(name)
        .inspect_err(|e| debug!("{} not on PATH: {}", name, e))
        .ok()
}

/// Candidate paths below every SDK root found in the environment
fn sdk_candidates(in_sdk: &[&str]) -> Vec<PathBuf> {
    SDK_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .filter(|root| !root.is_empty())
        .map(|root| {
            let mut path = PathBuf::from(root);
            path.extend(in_sdk);
            if cfg!(windows) {
                path.set_extension("exe");
            }
            path
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    /// Create `<root>/<parts...>` as an empty file
    fn touch(root: &Path, parts: &[&str]) -> PathBuf {
        let mut path = root.to_path_buf();
        path.extend(parts);
        if cfg!(windows) {
            path.set_extension("exe");
        }
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"").unwrap();
        path
    }

    fn clear_sdk_env() {
        for var in SDK_ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_configured_path_wins() {
        let temp = TempDir::new().unwrap();
        let configured = touch(temp.path(), &["custom", "adb"]);
        let sdk = touch(temp.path(), &["sdk", "platform-tools", "adb"]);
        std::env::set_var("ANDROID_HOME", temp.path().join("sdk"));

        let found = find_tool("adb", &ADB_IN_SDK, Some(&configured));
        clear_sdk_env();

        assert_eq!(found, Some(configured));
        assert_ne!(found, Some(sdk));
    }

    #[test]
    #[serial]
    fn test_android_home_is_searched() {
        let temp = TempDir::new().unwrap();
        let expected = touch(temp.path(), &["emulator", "emulator"]);
        clear_sdk_env();
        std::env::set_var("ANDROID_HOME", temp.path());

        let found = find_tool("emulator", &EMULATOR_IN_SDK, None);
        clear_sdk_env();

        assert_eq!(found, Some(expected));
    }

    #[test]
    #[serial]
    fn test_sdk_root_is_fallback_for_android_home() {
        let empty = TempDir::new().unwrap();
        let sdk = TempDir::new().unwrap();
        let expected = touch(sdk.path(), &["platform-tools", "adb"]);
        clear_sdk_env();
        std::env::set_var("ANDROID_HOME", empty.path());
        std::env::set_var("ANDROID_SDK_ROOT", sdk.path());

        let found = find_tool("adb", &ADB_IN_SDK, None);
        clear_sdk_env();

        assert_eq!(found, Some(expected));
    }

    #[test]
    #[serial]
    fn test_missing_configured_path_falls_through() {
        let temp = TempDir::new().unwrap();
        let expected = touch(temp.path(), &["platform-tools", "adb"]);
        clear_sdk_env();
        std::env::set_var("ANDROID_HOME", temp.path());

        let found = find_tool("adb", &ADB_IN_SDK, Some(Path::new("/nonexistent/adb")));
        clear_sdk_env();

        assert_eq!(found, Some(expected));
    }

    #[test]
    fn test_require_emulator_when_absent() {
        let paths = ToolPaths {
            adb: PathBuf::from("adb"),
            emulator: None,
        };
        assert!(matches!(
            paths.require_emulator(),
            Err(Error::EmulatorNotFound)
        ));
    }

    #[test]
    #[serial]
    fn test_empty_env_var_is_ignored() {
        clear_sdk_env();
        std::env::set_var("ANDROID_HOME", "");
        assert!(sdk_candidates(&ADB_IN_SDK).is_empty());
        clear_sdk_env();
    }
}
