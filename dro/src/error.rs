//! Error taxonomy for DRO communication.
//!
//! Errors fall into two groups. Per-exchange failures ([`DroError::Timeout`],
//! [`DroError::ShortFrame`], [`DroError::SentinelMismatch`]) are expected at
//! high poll rates and are normally folded into a missed-sample counter.
//! Everything else is either a transport fault or a session setup failure that
//! the operator has to fix.

use thiserror::Error;

/// Errors that can occur while talking to the digital readout.
#[derive(Error, Debug)]
pub enum DroError {
    /// Write or read did not complete within the timeout.
    #[error("Timeout waiting for device")]
    Timeout,

    /// Response shorter than the framing requires.
    #[error("Short frame: expected at least {expected} bytes, got {actual}")]
    ShortFrame {
        /// Minimum length for the active framing
        expected: usize,
        /// Bytes actually received
        actual: usize,
    },

    /// Leading sentinel did not match the expected constant.
    ///
    /// The sampler drains the IN queue before returning this error, so the next
    /// request starts from an empty channel.
    #[error("Sentinel mismatch: expected {expected:#010X}, found {found:#010X}")]
    SentinelMismatch {
        /// Sentinel for the request that was sent
        expected: u32,
        /// Sentinel decoded from the received frame
        found: u32,
    },

    /// Any other transport fault (disconnect, pipe error, overflow, ...).
    #[error("Channel error: {0}")]
    Channel(String),

    /// No device with the profile's vendor/product id is attached.
    #[error("Device {vendor_id:04X}:{product_id:04X} not found")]
    DeviceNotFound {
        /// USB vendor id searched for
        vendor_id: u16,
        /// USB product id searched for
        product_id: u16,
    },

    /// The OS refused access to the device.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Configuration or interface claim failed during session setup.
    #[error("Device setup failed: {0}")]
    Setup(String),

    /// The active profile has no request code for this command.
    #[error("Not supported by this device profile: {0}")]
    Unsupported(&'static str),

    /// A profile file could not be read or parsed.
    #[error("Invalid device profile: {0}")]
    InvalidProfile(String),

    /// Local file I/O (position log).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for DRO operations.
pub type DroResult<T> = Result<T, DroError>;

impl DroError {
    /// Whether this error only means "no sample this round".
    ///
    /// Transient errors are counted and dropped by the poll loop; a
    /// non-transient error is handed to the caller, which decides whether to
    /// abort the session.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DroError::Timeout | DroError::ShortFrame { .. } | DroError::SentinelMismatch { .. }
        )
    }

    /// Whether the session cannot be established or continued at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DroError::DeviceNotFound { .. }
                | DroError::AccessDenied(_)
                | DroError::Setup(_)
                | DroError::InvalidProfile(_)
        )
    }

    /// Troubleshooting steps for errors the operator has to act on.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            DroError::DeviceNotFound { .. } => Some(
                "1. Make sure the encoder board is connected via USB\n\
                 2. Verify the firmware is flashed correctly\n\
                 3. Check the USB cable connection\n\
                 4. Check that the selected --profile matches the firmware",
            ),
            DroError::AccessDenied(_) | DroError::Setup(_) => Some(
                "1. Run with sudo, or install a udev rule granting access to the device\n\
                 2. Make sure the board is running the correct firmware\n\
                 3. Try unplugging and reconnecting the device\n\
                 4. Check if another process is using the device",
            ),
            DroError::Channel(_) => Some(
                "1. Try unplugging and reconnecting the device\n\
                 2. Check if another process is using the device",
            ),
            _ => None,
        }
    }
}
