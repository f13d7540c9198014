//! ---
//! dl_section: "03-runtime-lifecycle"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "In-memory device catalog and provision watcher list."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use std::sync::Arc;

use devlink_clients::models::{Device, ProvisionWatcher};
use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;

/// Shared catalog of managed devices, keyed by device name.
///
/// Devices are held behind `Arc` so REST handlers and schedule jobs can
/// read a device without holding the catalog lock. Insertion order is
/// preserved for listing.
#[derive(Debug, Default)]
pub struct DeviceMap {
    devices: RwLock<IndexMap<String, Arc<Device>>>,
}

impl DeviceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a device. Returns the previous entry if the name
    /// was already present.
    pub fn insert(&self, device: Device) -> Option<Arc<Device>> {
        let name = device.name.clone();
        let previous = self.devices.write().insert(name.clone(), Arc::new(device));
        debug!(device = %name, replaced = previous.is_some(), "catalog updated");
        previous
    }

    pub fn get(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.read().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.write().shift_remove(name)
    }

    /// Replace the catalog contents wholesale, as when the metadata
    /// service is the source of truth at startup.
    pub fn populate(&self, devices: Vec<Device>) {
        let mut guard = self.devices.write();
        guard.clear();
        for device in devices {
            guard.insert(device.name.clone(), Arc::new(device));
        }
    }

    pub fn clear(&self) {
        self.devices.write().clear();
    }

    /// Snapshot of all devices in insertion order.
    pub fn list(&self) -> Vec<Arc<Device>> {
        self.devices.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

/// Provision watchers known to this service, merged by name.
#[derive(Debug, Default)]
pub struct WatchList {
    watchers: RwLock<IndexMap<String, ProvisionWatcher>>,
}

impl WatchList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge watchers into the list, keyed by name. Existing entries are
    /// replaced; returns how many names were new.
    pub fn merge(&self, watchers: Vec<ProvisionWatcher>) -> usize {
        let mut guard = self.watchers.write();
        let mut added = 0;
        for watcher in watchers {
            if guard.insert(watcher.name.clone(), watcher).is_none() {
                added += 1;
            }
        }
        added
    }

    pub fn get(&self, name: &str) -> Option<ProvisionWatcher> {
        self.watchers.read().get(name).cloned()
    }

    pub fn list(&self) -> Vec<ProvisionWatcher> {
        self.watchers.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.watchers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.read().is_empty()
    }
}
