//! fuky-bridge
//!
//! Bridges the FUKY wearable BLE IMU to local processes: tracks the sensor
//! through Bluetooth connect/disconnect churn, keeps a notification+poll
//! data channel to its telemetry characteristic, decodes the fixed 14-byte
//! frame into physical units and streams every frame to a single subscriber
//! over a length-framed local socket.

pub mod bridge;
pub mod domain;
pub mod infrastructure;

pub use bridge::ImuBridge;
pub use domain::models::{BridgeEvent, FrameEnvelope, PeripheralRecord};
pub use domain::protocol::{decode, DecodeError, ImuSample, FRAME_LEN};
pub use domain::registry::DeviceRegistry;
pub use domain::settings::BridgeSettings;
pub use infrastructure::bluetooth::{BleHost, GattLink, HostError, SessionState};
