//! Shared domain types for the bridge.

use crate::domain::protocol::{ImuSample, FRAME_LEN};
use std::time::SystemTime;
use uuid::Uuid;

/// One peripheral currently known to the device watcher.
///
/// Created on the first observation, replaced in place on later ones; the
/// identity string is the stable key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralRecord {
    /// Opaque platform identity (Windows AEP id on WinRT)
    pub id: String,
    pub name: String,
    pub connected: bool,
    /// Advertised GATT service identifiers
    pub services: Vec<Uuid>,
}

impl PeripheralRecord {
    pub fn advertises(&self, service: Uuid) -> bool {
        self.services.contains(&service)
    }
}

/// Events the bridge exposes to the surrounding application.
///
/// The bridge never touches presentation state; whichever task consumes this
/// channel decides what to do with each event.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    DeviceAdded(PeripheralRecord),
    DeviceUpdated(PeripheralRecord),
    DeviceRemoved(String),
    Error(String),
    FrameReady {
        raw: [u8; FRAME_LEN],
        sample: ImuSample,
    },
}

/// A decoded frame plus its capture context, broadcast to the pipe server.
#[derive(Debug, Clone, Copy)]
pub struct FrameEnvelope {
    /// UTC capture time, taken when the frame arrived from the sensor
    pub captured_at: SystemTime,
    pub raw: [u8; FRAME_LEN],
    pub sample: ImuSample,
}
