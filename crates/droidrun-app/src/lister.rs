//! Serialized access to the device-bridge list command
//!
//! adb interleaves the output of concurrent invocations, so every call from
//! this crate goes through one [`DeviceLister`], which runs them one at a time.
//! The registry and the emulator controller share the same lister.

use std::sync::Arc;

use droidrun_bridge::{parse_device_list, DeviceBridge};
use droidrun_core::prelude::*;
use droidrun_core::DeviceId;
use tokio::sync::Mutex;

pub struct DeviceLister<B> {
    bridge: Arc<B>,
    gate: Mutex<()>,
}

impl<B: DeviceBridge> DeviceLister<B> {
    pub fn new(bridge: Arc<B>) -> Self {
        Self {
            bridge,
            gate: Mutex::new(()),
        }
    }

    pub fn bridge(&self) -> &Arc<B> {
        &self.bridge
    }

    /// Ids of every attached and responsive device
    ///
    /// Never fails: a broken or garbled bridge reads as "no devices".
    pub async fn list(&self) -> Vec<DeviceId> {
        let raw = {
            let _guard = self.gate.lock().await;
            self.bridge.list_devices().await
        };

        match raw {
            Ok(raw) => {
                let list = parse_device_list(&raw);
                if let Some(warning) = &list.warning {
                    warn!("{}", warning);
                }
                list.attached()
            }
            Err(e) => {
                warn!("Listing devices failed, treating as no devices: {}", e);
                Vec::new()
            }
        }
    }

    /// Kill the bridge server (daemon reset)
    pub async fn kill_server(&self) -> Result<()> {
        let _guard = self.gate.lock().await;
        self.bridge.kill_server().await
    }
}
