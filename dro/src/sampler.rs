//! Request/response exchange with the DRO.
//!
//! # Protocol
//!
//! Every exchange is a single OUT packet holding the request byte (plus any
//! parameter bytes) followed by a single IN packet of up to 64 bytes:
//!
//! ```text
//! host -> device   [0x01]                    get position
//! device -> host   [sentinel][X][Y][Z][A]    or bare [X][Y][Z][A] on legacy firmware
//! ```
//!
//! Configuration requests (test mode, scale write, encoder reset) are written
//! the same way but produce no response.
//!
//! # Stale frames
//!
//! A response that arrives after its read timed out stays queued in the
//! transport and would be returned for the *next* request. When a sentinel
//! check fails the sampler therefore drains the IN queue with a short timeout
//! until the channel reports it empty, so the following request pairs with
//! its own response again.

use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::{DroError, DroResult};
use crate::frame::{self, Axis, Framing, Sample, MAX_PACKET};
use crate::pattern::TestPattern;
use crate::profile::DeviceProfile;
use crate::transport::Transport;

/// Upper bound on frames discarded by a single drain.
///
/// A device that keeps streaming would otherwise hold the drain forever.
pub const MAX_DRAIN_FRAMES: usize = 64;

/// Owns the device channel for one polling session.
pub struct PositionSampler<T: Transport> {
    transport: T,
    profile: DeviceProfile,
}

impl<T: Transport> PositionSampler<T> {
    pub fn new(transport: T, profile: DeviceProfile) -> Self {
        Self { transport, profile }
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Perform one request/response exchange.
    ///
    /// # Arguments
    ///
    /// * `request` - Request byte plus optional parameter bytes
    /// * `framing` - Expected response framing; [`Framing::Sentinel`] enables
    ///   the sentinel check and the stale-frame drain
    /// * `timeout` - Bound for the write and for the read
    ///
    /// # Errors
    ///
    /// - [`DroError::Timeout`] if either direction times out
    /// - [`DroError::ShortFrame`] if the response is shorter than the framing requires
    /// - [`DroError::SentinelMismatch`] if the sentinel is wrong (queue drained first)
    /// - [`DroError::Channel`] for any other transport fault
    pub fn sample_once(
        &mut self,
        request: &[u8],
        framing: Framing,
        timeout: Duration,
    ) -> DroResult<Sample> {
        self.write_request(request, timeout)?;

        let mut buf = [0u8; MAX_PACKET];
        let n = self.transport.read(&mut buf, timeout)?;
        trace!("DRO recv {} bytes: {:02X?}", n, &buf[..n]);

        match frame::decode(&buf[..n], framing) {
            Err(err @ DroError::SentinelMismatch { .. }) => {
                let drained = self.drain();
                debug!("{err}; drained {drained} stale frame(s)");
                Err(err)
            }
            other => other,
        }
    }

    /// Read and discard queued IN packets until the channel times out.
    ///
    /// Returns the number of packets discarded. A channel fault also ends the
    /// drain; it will resurface on the next exchange.
    pub fn drain(&mut self) -> usize {
        let timeout = self.profile.drain_timeout();
        let mut buf = [0u8; MAX_PACKET];
        let mut drained = 0;

        while drained < MAX_DRAIN_FRAMES {
            match self.transport.read(&mut buf, timeout) {
                Ok(n) => {
                    trace!("Discarding stale frame ({n} bytes)");
                    drained += 1;
                }
                Err(DroError::Timeout) => return drained,
                Err(e) => {
                    warn!("Drain stopped on channel error: {e}");
                    return drained;
                }
            }
        }

        warn!("Drain gave up after {MAX_DRAIN_FRAMES} frames; device may be streaming");
        drained
    }

    /// Query the current encoder positions.
    pub fn read_position(&mut self) -> DroResult<Sample> {
        let query = self.profile.position;
        let timeout = self.profile.request_timeout();
        self.sample_once(&[query.code], query.framing, timeout)
    }

    /// Query the four per-axis scale factors.
    pub fn read_scale(&mut self) -> DroResult<Sample> {
        let scale = self.profile.scale.ok_or(DroError::Unsupported("get scale"))?;
        let timeout = self.profile.request_timeout();
        self.sample_once(&[scale.get.code], scale.get.framing, timeout)
    }

    /// Write a request that produces no response.
    pub fn send(&mut self, request: &[u8]) -> DroResult<()> {
        let timeout = self.profile.request_timeout();
        self.write_request(request, timeout)
    }

    /// Switch the firmware to a synthetic pattern, or back to live encoder
    /// data with `None`.
    pub fn set_test_mode(&mut self, pattern: Option<TestPattern>) -> DroResult<()> {
        let control = self
            .profile
            .test_mode
            .ok_or(DroError::Unsupported("test mode"))?;

        for request in control.requests(pattern) {
            self.send(&request)?;
        }
        match pattern {
            Some(p) => debug!("Test mode enabled: {p}"),
            None => debug!("Test mode disabled"),
        }
        Ok(())
    }

    /// Set the counts-to-units scale factor for one axis.
    pub fn set_scale(&mut self, axis: Axis, scale: f64) -> DroResult<()> {
        let commands = self.profile.scale.ok_or(DroError::Unsupported("set scale"))?;

        let mut request = Vec::with_capacity(10);
        request.push(commands.set_code);
        request.push(axis.index());
        request.extend_from_slice(&scale.to_le_bytes());
        self.send(&request)
    }

    /// Zero the encoder count of one axis.
    pub fn reset_axis(&mut self, axis: Axis) -> DroResult<()> {
        let code = self
            .profile
            .reset_code
            .ok_or(DroError::Unsupported("reset position"))?;
        self.send(&[code, axis.index()])
    }

    fn write_request(&mut self, request: &[u8], timeout: Duration) -> DroResult<()> {
        trace!("DRO send: {:02X?}", request);
        let written = self.transport.write(request, timeout)?;
        if written != request.len() {
            return Err(DroError::Channel(format!(
                "Short write: {written} of {} bytes",
                request.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode, POSITION_SENTINEL, SCALE_SENTINEL};
    use crate::mock::ScriptedTransport;

    fn rp2040(transport: ScriptedTransport) -> PositionSampler<ScriptedTransport> {
        PositionSampler::new(transport, DeviceProfile::rp2040())
    }

    #[test]
    fn test_read_position_sends_single_request_byte() {
        let mut transport = ScriptedTransport::new();
        transport.push_frame(encode(
            Sample::new(1.5, -2.25, 0.0, 180.0),
            Framing::Sentinel(POSITION_SENTINEL),
        ));
        let mut sampler = rp2040(transport);

        let sample = sampler.read_position().unwrap();
        assert_eq!(sample, Sample::new(1.5, -2.25, 0.0, 180.0));
        assert_eq!(sampler.transport().writes(), &[vec![0x01]]);
    }

    #[test]
    fn test_short_frame_does_not_drain() {
        let mut transport = ScriptedTransport::new();
        transport.push_frame(vec![0u8; 20]);
        transport.push_frame(vec![0u8; 36]);
        let mut sampler = rp2040(transport);

        assert!(matches!(
            sampler.read_position(),
            Err(DroError::ShortFrame {
                expected: 36,
                actual: 20
            })
        ));
        assert_eq!(sampler.transport().read_calls(), 1);
        assert_eq!(sampler.transport().pending_reads(), 1);
    }

    #[test]
    fn test_sentinel_mismatch_drains_until_timeout() {
        let mut transport = ScriptedTransport::new();
        transport.push_frame(encode(Sample::default(), Framing::Sentinel(SCALE_SENTINEL)));
        transport.push_frame(encode(
            Sample::default(),
            Framing::Sentinel(POSITION_SENTINEL),
        ));
        transport.push_frame(encode(
            Sample::default(),
            Framing::Sentinel(POSITION_SENTINEL),
        ));
        let mut sampler = rp2040(transport);

        assert!(matches!(
            sampler.read_position(),
            Err(DroError::SentinelMismatch {
                expected: POSITION_SENTINEL,
                found: SCALE_SENTINEL
            })
        ));
        // One response, two stale frames, then the timeout that ends the drain
        assert_eq!(sampler.transport().read_calls(), 4);
        assert_eq!(sampler.transport().pending_reads(), 0);
    }

    #[test]
    fn test_drain_terminates_when_channel_always_times_out() {
        let mut sampler = rp2040(ScriptedTransport::new());
        assert_eq!(sampler.drain(), 0);
        assert_eq!(sampler.transport().read_calls(), 1);
    }

    #[test]
    fn test_drain_is_bounded_for_streaming_device() {
        let mut transport = ScriptedTransport::new();
        for _ in 0..MAX_DRAIN_FRAMES + 10 {
            transport.push_frame(vec![0u8; 36]);
        }
        let mut sampler = rp2040(transport);

        assert_eq!(sampler.drain(), MAX_DRAIN_FRAMES);
        assert_eq!(sampler.transport().pending_reads(), 10);
    }

    #[test]
    fn test_drain_stops_on_channel_error() {
        let mut transport = ScriptedTransport::new();
        transport.push_frame(vec![0u8; 36]);
        transport.push_error(DroError::Channel("pipe".to_string()));
        transport.push_frame(vec![0u8; 36]);
        let mut sampler = rp2040(transport);

        assert_eq!(sampler.drain(), 1);
        assert_eq!(sampler.transport().pending_reads(), 1);
    }

    #[test]
    fn test_timeout_and_channel_errors_pass_through() {
        let mut transport = ScriptedTransport::new();
        transport.push_error(DroError::Channel("No such device".to_string()));
        let mut sampler = rp2040(transport);

        assert!(matches!(sampler.read_position(), Err(DroError::Channel(_))));
        assert!(matches!(sampler.read_position(), Err(DroError::Timeout)));
    }

    #[test]
    fn test_write_timeout_skips_read() {
        let mut transport = ScriptedTransport::new();
        transport.fail_next_write(DroError::Timeout);
        let mut sampler = rp2040(transport);

        assert!(matches!(sampler.read_position(), Err(DroError::Timeout)));
        assert_eq!(sampler.transport().read_calls(), 0);
    }

    #[test]
    fn test_legacy_profile_accepts_bare_payload() {
        let mut transport = ScriptedTransport::new();
        transport.push_frame(encode(Sample::new(1.0, 2.0, 3.0, 4.0), Framing::Unframed));
        let mut sampler = PositionSampler::new(transport, DeviceProfile::pico());

        assert_eq!(
            sampler.read_position().unwrap(),
            Sample::new(1.0, 2.0, 3.0, 4.0)
        );
    }

    #[test]
    fn test_read_scale_uses_scale_sentinel() {
        let mut transport = ScriptedTransport::new();
        transport.push_frame(encode(
            Sample::new(0.005, 0.005, 0.0025, 0.1),
            Framing::Sentinel(SCALE_SENTINEL),
        ));
        let mut sampler = rp2040(transport);

        let scale = sampler.read_scale().unwrap();
        assert_eq!(scale.z, 0.0025);
        assert_eq!(sampler.transport().writes(), &[vec![0x04]]);
    }

    #[test]
    fn test_set_scale_and_reset_wire_format() {
        let mut sampler = rp2040(ScriptedTransport::new());
        sampler.set_scale(Axis::Y, 0.5).unwrap();
        sampler.reset_axis(Axis::A).unwrap();

        let writes = sampler.transport().writes();
        let mut expected_scale = vec![0x03, 1];
        expected_scale.extend_from_slice(&0.5f64.to_le_bytes());
        assert_eq!(writes[0], expected_scale);
        assert_eq!(writes[1], vec![0x05, 3]);
    }

    #[test]
    fn test_unsupported_commands_on_legacy_profile() {
        let mut sampler = PositionSampler::new(ScriptedTransport::new(), DeviceProfile::pico());
        assert!(matches!(
            sampler.read_scale(),
            Err(DroError::Unsupported(_))
        ));
        assert!(matches!(
            sampler.reset_axis(Axis::X),
            Err(DroError::Unsupported(_))
        ));
        assert!(sampler.transport().writes().is_empty());
    }

    #[test]
    fn test_set_test_mode_writes_without_reading() {
        let mut sampler = PositionSampler::new(ScriptedTransport::new(), DeviceProfile::pico());
        sampler
            .set_test_mode(Some(TestPattern::LinearRamp))
            .unwrap();
        sampler.set_test_mode(None).unwrap();

        assert_eq!(
            sampler.transport().writes(),
            &[vec![0x04, 2], vec![0x02], vec![0x03]]
        );
        assert_eq!(sampler.transport().read_calls(), 0);
    }
}
