//! Host-side driver for the USB quadrature-encoder digital readout (DRO).
//!
//! The DRO firmware reports four axis positions (X, Y, Z and a rotary A axis)
//! as little-endian `f64` values in answer to a one-byte vendor request. This
//! crate provides the wire codec, a [`PositionSampler`] that performs one
//! request/response exchange and recovers from stale frames, and a
//! rate-limited poll loop with session statistics.
//!
//! # Features
//!
//! - `usb` (default) - libusb transport for attached devices
//! - `test-util` - `mock::ScriptedTransport` for tests without hardware
//!
//! The simulated backend ([`sim::SimulatedDro`]) is always available and
//! emulates the firmware, including its test-pattern modes.
//!
//! # Example
//!
//! ```no_run
//! use dro::{run_poll, CancelToken, PollConfig, SystemClock};
//! use dro::session::{Backend, Connection};
//! use dro::DeviceProfile;
//!
//! let mut conn = Connection::open(DeviceProfile::rp2040(), Backend::Usb)?;
//! let config = PollConfig::new(100.0).with_duration(std::time::Duration::from_secs(5));
//! let report = run_poll(&mut conn.sampler, &SystemClock, &CancelToken::new(), &config, &mut ());
//! println!("{}", dro::report::format_summary(&report));
//! # Ok::<(), dro::DroError>(())
//! ```

pub mod cancel;
pub mod clock;
pub mod error;
pub mod frame;
pub mod log;
pub mod pattern;
pub mod poll;
pub mod profile;
pub mod report;
pub mod sampler;
pub mod session;
pub mod sim;
pub mod transport;

#[cfg(feature = "usb")]
pub mod usb;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use cancel::CancelToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DroError, DroResult};
pub use frame::{Axis, Framing, Sample};
pub use pattern::TestPattern;
pub use poll::{
    run_poll, run_poll_with_pattern, MissAction, PollConfig, PollObserver, PollReport, PollState,
    PositionStats, StopReason,
};
pub use profile::DeviceProfile;
pub use sampler::PositionSampler;
pub use transport::Transport;
