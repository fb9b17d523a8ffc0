//! Device Registry
//!
//! Thread-safe map of currently present peripherals plus the identity of the
//! one matching the target service. Written by the device watcher task, read
//! by the characteristic session; every operation takes the single internal
//! lock so target bookkeeping is atomic with the map mutation.

use crate::domain::models::PeripheralRecord;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Result of a registry upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    Updated,
}

#[derive(Debug, Default)]
struct RegistryInner {
    devices: HashMap<String, PeripheralRecord>,
    /// Identity of the record advertising the target service, if any
    target: Option<String>,
}

/// Registry of present peripherals. Holds no network state.
#[derive(Debug)]
pub struct DeviceRegistry {
    target_service: Uuid,
    inner: Mutex<RegistryInner>,
}

impl DeviceRegistry {
    pub fn new(target_service: Uuid) -> Self {
        Self {
            target_service,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    pub fn target_service(&self) -> Uuid {
        self.target_service
    }

    /// Insert or replace a record. An existing identity is replaced without
    /// creating a duplicate; target designation is recomputed from the new
    /// service set in the same critical section.
    pub fn upsert(&self, record: PeripheralRecord) -> UpsertOutcome {
        let mut inner = self.inner.lock().expect("registry lock poisoned");

        let outcome = if inner.devices.contains_key(&record.id) {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Added
        };

        if record.advertises(self.target_service) {
            inner.target = Some(record.id.clone());
        } else if inner.target.as_deref() == Some(record.id.as_str()) {
            // Record no longer advertises the target service
            inner.target = None;
        }

        inner.devices.insert(record.id.clone(), record);
        outcome
    }

    /// Remove a record by identity. Clears the target designation in the
    /// same operation when the removed record was the target.
    pub fn remove(&self, id: &str) -> Option<PeripheralRecord> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if inner.target.as_deref() == Some(id) {
            inner.target = None;
        }
        inner.devices.remove(id)
    }

    /// The record currently advertising the target service, if any.
    pub fn current_target(&self) -> Option<PeripheralRecord> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner
            .target
            .as_ref()
            .and_then(|id| inner.devices.get(id))
            .cloned()
    }

    /// Snapshot of all known peripherals, for display by the caller.
    pub fn devices(&self) -> Vec<PeripheralRecord> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.devices.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .devices
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
