//! Bluetooth Module
//!
//! Everything between the platform BLE stack and the decoded frame feed:
//!
//! - [`host`] - the narrow contract the bridge requires from the platform
//! - [`watcher`] - peripheral presence tracking into the device registry
//! - [`session`] - the characteristic session state machine
//! - [`winrt`] - the Windows implementation of the host contract

pub mod host;
pub mod session;
pub mod watcher;

#[cfg(windows)]
pub mod winrt;

#[cfg(test)]
pub(crate) mod mock;

pub use host::{BleHost, GattLink, HostError};
pub use session::{CharacteristicSession, SessionConfig, SessionState};
pub use watcher::DeviceWatcher;
