//! Wiring of lister, emulator controller, registry and deployer
//!
//! The CLI and the integration tests build the same object graph from
//! [`Settings`]; [`Runtime`] is that graph.

use std::path::PathBuf;
use std::sync::Arc;

use droidrun_bridge::{DeviceBridge, EmulatorSpawner};
use droidrun_core::prelude::*;

use crate::config::Settings;
use crate::deploy::{Deployer, WaitConfig};
use crate::emulator::{EmulatorConfig, EmulatorController};
use crate::lister::DeviceLister;
use crate::registry::{DeviceRegistry, RegistryConfig};

pub struct Runtime<B: DeviceBridge> {
    pub registry: Arc<DeviceRegistry<B>>,
    pub deployer: Deployer<B>,
}

impl<B: DeviceBridge> Runtime<B> {
    /// Build every component from `settings`
    ///
    /// `prefs_dir` is where the emulator port is remembered; `None` keeps
    /// the configured default port without persisting it.
    pub fn new(
        bridge: Arc<B>,
        spawner: Arc<dyn EmulatorSpawner>,
        settings: &Settings,
        prefs_dir: Option<PathBuf>,
    ) -> Self {
        let lister = Arc::new(DeviceLister::new(bridge));

        let emulator = EmulatorConfig {
            avd_name: settings.emulator.avd_name.clone(),
            default_port: settings.emulator.default_port,
            prefs_dir,
            boot_poll: settings.emulator.boot_poll_interval(),
        };
        let controller = Arc::new(EmulatorController::new(
            Arc::clone(&lister),
            spawner,
            emulator,
        ));

        let registry = Arc::new(DeviceRegistry::new(
            lister,
            controller,
            RegistryConfig {
                retry: settings.registry.retry_interval(),
                kill_emulator_on_shutdown: settings.emulator.kill_on_exit,
            },
        ));

        let wait = WaitConfig {
            attempts: settings.deploy.wait_attempts,
            slice: settings.deploy.wait_slice(),
        };
        debug!(
            "Runtime ready (wait {} x {:?}, avd {})",
            wait.attempts, wait.slice, settings.emulator.avd_name
        );

        Self {
            deployer: Deployer::new(Arc::clone(&registry), wait),
            registry,
        }
    }

    /// Release devices and stop background work
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use droidrun_bridge::test_utils::{FakeBridge, FakeSpawner};
    use droidrun_core::EmulatorState;
    use tempfile::tempdir;

    #[tokio::test(start_paused = true)]
    async fn test_settings_reach_the_emulator() {
        let temp = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.emulator.avd_name = "pixel".to_string();
        settings.emulator.default_port = 5580;

        let bridge = Arc::new(FakeBridge::with_devices(&["emulator-5580"]));
        let spawner = Arc::new(FakeSpawner::new());
        let runtime = Runtime::new(
            Arc::clone(&bridge),
            Arc::clone(&spawner) as Arc<dyn EmulatorSpawner>,
            &settings,
            Some(temp.path().to_path_buf()),
        );

        let state = runtime.registry.controller().launch().await.unwrap();
        assert_eq!(state, EmulatorState::Running);
        assert_eq!(spawner.spawns(), vec![("pixel".to_string(), 5580)]);
        assert_eq!(
            crate::config::load_user_preferences(temp.path())
                .and_then(|prefs| prefs.emulator_port),
            Some(5580)
        );

        runtime.shutdown().await;
    }
}
