//! Synthetic motion patterns the firmware can emit instead of encoder data.

use strum::{Display, EnumIter, EnumString};

/// Test pattern selectable over the vendor interface.
///
/// The discriminant is the pattern index sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum TestPattern {
    /// Independent sine on every axis
    #[strum(serialize = "sine")]
    SineWave = 0,
    /// X/Y trace a circle, Z drifts slowly, A spins
    Circular = 1,
    /// Constant velocity on every axis
    #[strum(serialize = "ramp")]
    LinearRamp = 2,
    /// Small pseudo-random steps every 50 ms
    RandomWalk = 3,
}

impl TestPattern {
    /// Pattern index as sent on the wire.
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Inverse of [`index`](Self::index).
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(TestPattern::SineWave),
            1 => Some(TestPattern::Circular),
            2 => Some(TestPattern::LinearRamp),
            3 => Some(TestPattern::RandomWalk),
            _ => None,
        }
    }
}
