//! Response frame codec.
//!
//! A position or scale response carries four little-endian `f64` values in
//! fixed axis order (X, Y, Z, A). Two framings exist across firmware
//! generations:
//!
//! ```text
//! Unframed:  [X:8][Y:8][Z:8][A:8]                 = 32 bytes
//! Sentinel:  [sentinel:4][X:8][Y:8][Z:8][A:8]     = 36 bytes
//! ```
//!
//! The sentinel is a little-endian `u32` magic number that differs per request
//! type, so a position frame can never be mistaken for a scale frame. Bytes
//! past the minimum length are ignored.

use std::ops::Index;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::{DroError, DroResult};

/// Size of the four-axis payload in bytes.
pub const PAYLOAD_LEN: usize = 32;

/// Size of the leading sentinel in bytes.
pub const SENTINEL_LEN: usize = 4;

/// Largest packet the vendor endpoints transfer.
pub const MAX_PACKET: usize = 64;

/// Sentinel prefixed to position responses.
pub const POSITION_SENTINEL: u32 = 0x3F8A7C91;

/// Sentinel prefixed to scale responses.
pub const SCALE_SENTINEL: u32 = 0x7B2D4E8F;

/// Encoder axis, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Axis {
    X,
    Y,
    Z,
    /// Rotary axis, usually reported in degrees.
    A,
}

impl Axis {
    /// Zero-based position of the axis in the payload (also the encoder index
    /// used by per-axis commands).
    pub fn index(self) -> u8 {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
            Axis::A => 3,
        }
    }
}

/// One decoded four-axis reading.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub a: f64,
}

impl Sample {
    pub const fn new(x: f64, y: f64, z: f64, a: f64) -> Self {
        Self { x, y, z, a }
    }

    /// Values in wire order.
    pub fn to_array(self) -> [f64; 4] {
        [self.x, self.y, self.z, self.a]
    }

    pub fn from_array(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }

    /// Decode the 32-byte payload.
    pub fn from_le_bytes(bytes: &[u8; PAYLOAD_LEN]) -> Self {
        let mut values = [0.0f64; 4];
        for (value, chunk) in values.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            *value = f64::from_le_bytes(raw);
        }
        Self::from_array(values)
    }

    /// Encode as the 32-byte payload.
    pub fn to_le_bytes(self) -> [u8; PAYLOAD_LEN] {
        let mut bytes = [0u8; PAYLOAD_LEN];
        for (chunk, value) in bytes.chunks_exact_mut(8).zip(self.to_array()) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// Combine two samples axis by axis.
    pub fn zip_with(self, other: Sample, f: impl Fn(f64, f64) -> f64) -> Sample {
        Sample::new(
            f(self.x, other.x),
            f(self.y, other.y),
            f(self.z, other.z),
            f(self.a, other.a),
        )
    }

    pub fn min(self, other: Sample) -> Sample {
        self.zip_with(other, f64::min)
    }

    pub fn max(self, other: Sample) -> Sample {
        self.zip_with(other, f64::max)
    }

    /// Axis-wise `self - other`.
    pub fn sub(self, other: Sample) -> Sample {
        self.zip_with(other, |a, b| a - b)
    }
}

impl Index<Axis> for Sample {
    type Output = f64;

    fn index(&self, axis: Axis) -> &f64 {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
            Axis::A => &self.a,
        }
    }
}

/// How a response frame is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Legacy firmware: bare 32-byte payload.
    Unframed,
    /// 4-byte little-endian sentinel followed by the payload.
    Sentinel(u32),
}

impl Framing {
    /// Shortest acceptable response for this framing.
    pub fn min_len(self) -> usize {
        match self {
            Framing::Unframed => PAYLOAD_LEN,
            Framing::Sentinel(_) => SENTINEL_LEN + PAYLOAD_LEN,
        }
    }
}

/// Validate a response buffer and decode its payload.
///
/// Length is checked before anything else, so a short buffer never has its
/// sentinel or payload bytes interpreted.
pub fn decode(buf: &[u8], framing: Framing) -> DroResult<Sample> {
    let expected = framing.min_len();
    if buf.len() < expected {
        return Err(DroError::ShortFrame {
            expected,
            actual: buf.len(),
        });
    }

    let payload = match framing {
        Framing::Unframed => &buf[..PAYLOAD_LEN],
        Framing::Sentinel(sentinel) => {
            let found = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
            if found != sentinel {
                return Err(DroError::SentinelMismatch {
                    expected: sentinel,
                    found,
                });
            }
            &buf[SENTINEL_LEN..SENTINEL_LEN + PAYLOAD_LEN]
        }
    };

    let mut bytes = [0u8; PAYLOAD_LEN];
    bytes.copy_from_slice(payload);
    Ok(Sample::from_le_bytes(&bytes))
}

/// Build a response frame for `sample`.
pub fn encode(sample: Sample, framing: Framing) -> Vec<u8> {
    let mut frame = Vec::with_capacity(framing.min_len());
    if let Framing::Sentinel(sentinel) = framing {
        frame.extend_from_slice(&sentinel.to_le_bytes());
    }
    frame.extend_from_slice(&sample.to_le_bytes());
    frame
}
