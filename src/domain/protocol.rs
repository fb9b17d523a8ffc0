//! FUKY Sensor Protocol
//!
//! This module contains the protocol definitions for the FUKY wearable IMU:
//! the vendor GATT identifiers and the decoder for its fixed 14-byte
//! telemetry frame.

use thiserror::Error;
use uuid::{uuid, Uuid};

/// FUKY vendor BLE service UUID (`f233` in the Bluetooth base range)
pub const TARGET_SERVICE_UUID: Uuid = uuid!("0000f233-0000-1000-8000-00805f9b34fb");

/// Telemetry characteristic UUID - where IMU frames are read and notified
pub const TARGET_CHARACTERISTIC_UUID: Uuid = uuid!("0000f666-0000-1000-8000-00805f9b34fb");

/// Exact wire length of one telemetry frame
pub const FRAME_LEN: usize = 14;

/// Fixed-point scaling factors used by the sensor firmware.
///
/// The on-device fusion core emits Q-format integers: a raw value is
/// `physical * 2^n`. These exponents are protocol constants, not tunables.
pub mod scale {
    /// Linear acceleration: Q8, i.e. `raw * 2^-8` gives units of g
    pub const ACCEL_Q: u32 = 8;
    /// Orientation quaternion: Q14, i.e. `raw * 2^-14` gives a unit component
    pub const QUAT_Q: u32 = 14;

    /// Multiplier for a Q-format exponent
    pub const fn q(n: u32) -> f32 {
        1.0 / (1u32 << n) as f32
    }
}

/// Decode failure for a candidate telemetry frame
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame is {actual} bytes, expected {FRAME_LEN}")]
    WrongLength { actual: usize },
}

/// One decoded IMU sample.
///
/// Keeps both the raw signed 16-bit components as they appeared on the wire
/// and the scaled physical values. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    // Raw fixed-point components, wire order
    pub raw_accel_x: i16,
    pub raw_accel_y: i16,
    pub raw_accel_z: i16,
    pub raw_quat_i: i16,
    pub raw_quat_j: i16,
    pub raw_quat_k: i16,
    pub raw_quat_w: i16,

    // Linear acceleration in g
    pub accel_x: f32,
    pub accel_y: f32,
    pub accel_z: f32,

    // Normalized orientation quaternion
    pub quat_i: f32,
    pub quat_j: f32,
    pub quat_k: f32,
    pub quat_w: f32,
}

/// Decode a 14-byte telemetry frame.
///
/// The frame is seven little-endian `i16` words in fixed order: acceleration
/// X/Y/Z then quaternion I/J/K/W. Any other input length is rejected.
pub fn decode(bytes: &[u8]) -> Result<ImuSample, DecodeError> {
    if bytes.len() != FRAME_LEN {
        return Err(DecodeError::WrongLength {
            actual: bytes.len(),
        });
    }

    let mut words = [0i16; 7];
    for (i, word) in words.iter_mut().enumerate() {
        *word = i16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]);
    }

    let accel = scale::q(scale::ACCEL_Q);
    let quat = scale::q(scale::QUAT_Q);

    Ok(ImuSample {
        raw_accel_x: words[0],
        raw_accel_y: words[1],
        raw_accel_z: words[2],
        raw_quat_i: words[3],
        raw_quat_j: words[4],
        raw_quat_k: words[5],
        raw_quat_w: words[6],
        accel_x: words[0] as f32 * accel,
        accel_y: words[1] as f32 * accel,
        accel_z: words[2] as f32 * accel,
        quat_i: words[3] as f32 * quat,
        quat_j: words[4] as f32 * quat,
        quat_k: words[5] as f32 * quat,
        quat_w: words[6] as f32 * quat,
    })
}
