//! Device and firmware profiles.
//!
//! A [`DeviceProfile`] describes one firmware generation: how to find the
//! device, which endpoints carry requests, which request codes it understands
//! and how its responses are framed. Profiles are immutable once built and are
//! passed explicitly to the sampler.
//!
//! Two profiles ship built in:
//!
//! | Name     | PID    | Position frame        | Scale | Reset | Test mode              |
//! |----------|--------|-----------------------|-------|-------|------------------------|
//! | `rp2040` | 0xC0DE | sentinel + 32 bytes   | yes   | yes   | `0x02 <mode>`          |
//! | `pico`   | 0x10DF | 32 bytes              | no    | no    | `0x02` / `0x03` / `0x04 <pattern>` |
//!
//! Other firmware builds can be described in a JSON file and loaded with
//! [`DeviceProfile::resolve`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DroError, DroResult};
use crate::frame::{Framing, POSITION_SENTINEL, SCALE_SENTINEL};
use crate::pattern::TestPattern;

/// Raspberry Pi Foundation vendor id.
pub const RPI_VENDOR_ID: u16 = 0x2E8A;

/// Names accepted by [`DeviceProfile::builtin`].
pub const BUILTIN_PROFILES: [&str; 2] = ["rp2040", "pico"];

/// A request that is answered with a four-axis frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Request byte
    pub code: u8,
    /// Framing of the response
    pub framing: Framing,
}

/// Scale factor commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleCommands {
    /// Read all four scale factors
    pub get: Query,
    /// Write one scale factor: `[code, axis, f64 LE]`
    pub set_code: u8,
}

/// How the firmware is switched into and out of test-pattern mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TestModeControl {
    /// One request with a mode parameter: `0` disables, `n` selects pattern `n - 1`.
    ModeByte { code: u8 },
    /// Separate enable and disable requests plus a pattern-select request
    /// carrying the pattern index.
    Split {
        enable: u8,
        disable: u8,
        select_pattern: u8,
    },
}

impl TestModeControl {
    /// Byte sequences to write, in order. None of them produce a response.
    ///
    /// `None` disables test mode.
    pub fn requests(&self, pattern: Option<TestPattern>) -> Vec<Vec<u8>> {
        match (*self, pattern) {
            (TestModeControl::ModeByte { code }, None) => vec![vec![code, 0]],
            (TestModeControl::ModeByte { code }, Some(p)) => vec![vec![code, p.index() + 1]],
            (TestModeControl::Split { disable, .. }, None) => vec![vec![disable]],
            (
                TestModeControl::Split {
                    enable,
                    select_pattern,
                    ..
                },
                Some(p),
            ) => vec![vec![select_pattern, p.index()], vec![enable]],
        }
    }
}

/// Everything the host needs to know about one firmware generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Short name used in logs
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Vendor-class interface number to claim
    #[serde(default)]
    pub interface: u8,
    /// Bulk IN endpoint address (device to host)
    pub endpoint_in: u8,
    /// Bulk OUT endpoint address (host to device)
    pub endpoint_out: u8,
    /// Position query
    pub position: Query,
    #[serde(default)]
    pub scale: Option<ScaleCommands>,
    /// Reset one encoder to zero: `[code, axis]`
    #[serde(default)]
    pub reset_code: Option<u8>,
    #[serde(default)]
    pub test_mode: Option<TestModeControl>,
    /// Timeout for each request write and response read
    pub request_timeout_ms: u64,
    /// Per-read timeout while draining stale frames
    pub drain_timeout_ms: u64,
}

impl DeviceProfile {
    /// Current RP2040 firmware: sentinel-framed responses, scale and reset
    /// commands, single-byte test mode control.
    pub fn rp2040() -> Self {
        Self {
            name: "rp2040".to_string(),
            vendor_id: RPI_VENDOR_ID,
            product_id: 0xC0DE,
            interface: 0,
            endpoint_in: 0x81,
            endpoint_out: 0x01,
            position: Query {
                code: 0x01,
                framing: Framing::Sentinel(POSITION_SENTINEL),
            },
            scale: Some(ScaleCommands {
                get: Query {
                    code: 0x04,
                    framing: Framing::Sentinel(SCALE_SENTINEL),
                },
                set_code: 0x03,
            }),
            reset_code: Some(0x05),
            test_mode: Some(TestModeControl::ModeByte { code: 0x02 }),
            request_timeout_ms: 10,
            drain_timeout_ms: 1,
        }
    }

    /// Original Pico firmware: bare 32-byte position frames, no scale access.
    pub fn pico() -> Self {
        Self {
            name: "pico".to_string(),
            vendor_id: RPI_VENDOR_ID,
            product_id: 0x10DF,
            interface: 0,
            endpoint_in: 0x81,
            endpoint_out: 0x01,
            position: Query {
                code: 0x01,
                framing: Framing::Unframed,
            },
            scale: None,
            reset_code: None,
            test_mode: Some(TestModeControl::Split {
                enable: 0x02,
                disable: 0x03,
                select_pattern: 0x04,
            }),
            request_timeout_ms: 100,
            drain_timeout_ms: 1,
        }
    }

    /// Look up a built-in profile by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rp2040" => Some(Self::rp2040()),
            "pico" => Some(Self::pico()),
            _ => None,
        }
    }

    /// Load a profile from a JSON file.
    pub fn from_json_file(path: &Path) -> DroResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DroError::InvalidProfile(format!("{}: {e}", path.display())))?;
        let profile: Self = serde_json::from_str(&text)
            .map_err(|e| DroError::InvalidProfile(format!("{}: {e}", path.display())))?;
        profile.validate()?;
        Ok(profile)
    }

    /// Resolve a CLI argument: a built-in profile name or a path to a JSON file.
    pub fn resolve(arg: &str) -> DroResult<Self> {
        if let Some(profile) = Self::builtin(arg) {
            return Ok(profile);
        }
        let path = Path::new(arg);
        if path.exists() {
            return Self::from_json_file(path);
        }
        Err(DroError::InvalidProfile(format!(
            "'{arg}' is neither a built-in profile ({}) nor a file",
            BUILTIN_PROFILES.join(", ")
        )))
    }

    /// Sanity checks for hand-written profiles.
    pub fn validate(&self) -> DroResult<()> {
        if self.endpoint_in & 0x80 == 0 {
            return Err(DroError::InvalidProfile(format!(
                "endpoint_in {:#04x} is not an IN endpoint",
                self.endpoint_in
            )));
        }
        if self.endpoint_out & 0x80 != 0 {
            return Err(DroError::InvalidProfile(format!(
                "endpoint_out {:#04x} is not an OUT endpoint",
                self.endpoint_out
            )));
        }
        if self.request_timeout_ms == 0 || self.drain_timeout_ms == 0 {
            return Err(DroError::InvalidProfile(
                "timeouts must be at least 1 ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
