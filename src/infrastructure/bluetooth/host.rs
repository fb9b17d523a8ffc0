//! Platform BLE contract.
//!
//! The bridge only needs four things from the platform Bluetooth facility:
//! peripheral-presence notifications filtered by connection state, a
//! connection/service probe for a given identity, characteristic resolution
//! by UUID, and a value channel (uncached read + change notifications).
//! [`BleHost`] captures exactly that, so the pipeline can run against the
//! WinRT stack in production and an in-memory host in tests.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Raw presence event from the platform watcher. Added and updated
/// observations are indistinguishable here; the registry deduplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Observed { id: String },
    Removed { id: String },
}

/// Snapshot of one peripheral's platform state.
#[derive(Debug, Clone)]
pub struct PeripheralProbe {
    pub name: String,
    pub connected: bool,
    pub services: Vec<Uuid>,
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("device {0} is unreachable")]
    DeviceUnreachable(String),
    #[error("service {0} not found on device")]
    ServiceNotFound(Uuid),
    #[error("characteristic {0} not found in service")]
    CharacteristicNotFound(Uuid),
    #[error("enumeration failed: {0}")]
    Enumeration(String),
}

/// Keeps the platform watcher registered. Dropping the guard detaches the
/// platform callbacks and closes the event channel handed to `start_watch`.
pub trait WatchGuard: Send {}

#[async_trait]
pub trait BleHost: Send + Sync {
    /// Begin delivering presence events for connected BLE peripherals into
    /// `events`. Monitoring stops when the returned guard is dropped.
    fn start_watch(
        &self,
        events: mpsc::UnboundedSender<WatchEvent>,
    ) -> anyhow::Result<Box<dyn WatchGuard>>;

    /// Query connection status and GATT service list for one identity.
    /// `Ok(None)` means the peripheral is gone or not currently connected.
    async fn probe(&self, id: &str) -> Result<Option<PeripheralProbe>, HostError>;

    /// Resolve the target characteristic on a live connection.
    async fn open_characteristic(
        &self,
        id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Arc<dyn GattLink>, HostError>;
}

/// A bound characteristic on a live connection.
#[async_trait]
pub trait GattLink: Send + Sync {
    /// Force-uncached read of the current characteristic value.
    async fn read_uncached(&self) -> anyhow::Result<Vec<u8>>;

    /// Enable change notifications, delivering each new value into `values`.
    async fn subscribe(&self, values: mpsc::UnboundedSender<Vec<u8>>) -> anyhow::Result<()>;

    /// Disable change notifications. Safe to call when not subscribed.
    async fn unsubscribe(&self) -> anyhow::Result<()>;
}
