//! The set of live devices

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

use droidrun_bridge::TargetDevice;
use droidrun_core::prelude::*;
use droidrun_core::{DeviceId, DeviceKind};

/// Live devices keyed by id
///
/// Adding an id twice or removing an id that was never added are
/// [`Error::Invariant`]s and leave the table untouched.
#[derive(Debug)]
pub struct DeviceTable<D> {
    devices: BTreeMap<DeviceId, Arc<D>>,
}

impl<D> Default for DeviceTable<D> {
    fn default() -> Self {
        Self {
            devices: BTreeMap::new(),
        }
    }
}

impl<D: TargetDevice> DeviceTable<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, device: Arc<D>) -> Result<()> {
        let id = device.id().clone();
        if self.devices.contains_key(&id) {
            return Err(Error::invariant(format!("device {} added twice", id)));
        }
        debug!("Device {} added", id);
        self.devices.insert(id, device);
        Ok(())
    }

    pub fn remove(&mut self, id: &DeviceId) -> Result<Arc<D>> {
        let device = self
            .devices
            .remove(id)
            .ok_or_else(|| Error::invariant(format!("removal of unknown device {}", id)))?;
        debug!("Device {} removed", id);
        Ok(device)
    }

    /// Remove `id` only if it still maps to `device`
    pub fn forget(&mut self, id: &DeviceId, device: &Weak<D>) -> Option<Arc<D>> {
        let current = self.devices.get(id)?;
        if !Weak::ptr_eq(&Arc::downgrade(current), device) {
            return None;
        }
        self.devices.remove(id)
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    pub fn ids(&self) -> BTreeSet<DeviceId> {
        self.devices.keys().cloned().collect()
    }

    /// First device (in id order) of the given kind
    pub fn find(&self, kind: DeviceKind) -> Option<Arc<D>> {
        self.devices
            .iter()
            .find(|(id, _)| kind.matches(id))
            .map(|(_, device)| Arc::clone(device))
    }

    pub fn snapshot(&self) -> Vec<Arc<D>> {
        self.devices.values().cloned().collect()
    }

    pub fn drain(&mut self) -> Vec<Arc<D>> {
        std::mem::take(&mut self.devices).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use droidrun_bridge::test_utils::FakeDevice;

    fn device(id: &str) -> Arc<FakeDevice> {
        Arc::new(FakeDevice::new(id))
    }

    #[test]
    fn test_duplicate_add_is_invariant_violation() {
        let mut table = DeviceTable::new();
        table.add(device("emulator-5554")).unwrap();

        let err = table.add(device("emulator-5554")).unwrap_err();

        assert!(err.is_invariant());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_unknown_remove_is_invariant_violation() {
        let mut table: DeviceTable<FakeDevice> = DeviceTable::new();
        table.add(device("HT91MLC00031")).unwrap();

        let err = table.remove(&DeviceId::new("emulator-5554")).unwrap_err();

        assert!(err.is_invariant());
        assert!(table.contains(&DeviceId::new("HT91MLC00031")));
    }

    #[test]
    fn test_remove_then_add_again() {
        let mut table = DeviceTable::new();
        table.add(device("emulator-5554")).unwrap();
        table.remove(&DeviceId::new("emulator-5554")).unwrap();
        table.add(device("emulator-5554")).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_find_by_kind() {
        let mut table = DeviceTable::new();
        table.add(device("HT91MLC00031")).unwrap();
        table.add(device("emulator-5554")).unwrap();

        let emulator = table.find(DeviceKind::Emulator).unwrap();
        let hardware = table.find(DeviceKind::Hardware).unwrap();

        assert_eq!(emulator.id().as_str(), "emulator-5554");
        assert_eq!(hardware.id().as_str(), "HT91MLC00031");
    }

    #[test]
    fn test_find_returns_none_without_match() {
        let mut table = DeviceTable::new();
        table.add(device("emulator-5554")).unwrap();
        assert!(table.find(DeviceKind::Hardware).is_none());
    }

    #[test]
    fn test_forget_ignores_replaced_device() {
        let mut table = DeviceTable::new();
        let old = device("emulator-5554");
        let old_weak = Arc::downgrade(&old);
        table.add(old).unwrap();
        table.remove(&DeviceId::new("emulator-5554")).unwrap();
        table.add(device("emulator-5554")).unwrap();

        assert!(table.forget(&DeviceId::new("emulator-5554"), &old_weak).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_forget_removes_current_device() {
        let mut table = DeviceTable::new();
        let current = device("HT91MLC00031");
        let weak = Arc::downgrade(&current);
        table.add(current).unwrap();

        assert!(table.forget(&DeviceId::new("HT91MLC00031"), &weak).is_some());
        assert!(table.is_empty());
    }
}
