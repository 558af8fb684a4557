//! In-process emulation of the DRO firmware.
//!
//! [`SimulatedDro`] parses OUT packets the way the firmware does (several
//! requests may share one packet, parameter bytes follow their request byte)
//! and queues the responses it would send. It generates the same synthetic
//! motion as the firmware's test modes, which makes it useful for exercising
//! the monitor and tool binaries without a board attached.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{DroError, DroResult};
use crate::frame::{encode, Sample};
use crate::pattern::TestPattern;
use crate::profile::{DeviceProfile, TestModeControl};
use crate::transport::Transport;

/// Random-walk step interval.
const RANDOM_WALK_PERIOD: Duration = Duration::from_millis(50);

/// Linear congruential generator used by the firmware's random walk.
#[derive(Debug, Clone)]
struct Lcg(u32);

impl Lcg {
    /// Uniform value in `[-0.5, 0.5)`.
    fn next_centered(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        ((self.0 >> 16) & 0x7FFF) as f64 / 32768.0 - 0.5
    }
}

#[derive(Debug, Clone)]
struct TestMode {
    pattern: TestPattern,
    started: Instant,
    base: [f64; 4],
    last_step: Instant,
}

/// Firmware emulator implementing [`Transport`].
#[derive(Debug)]
pub struct SimulatedDro {
    profile: DeviceProfile,
    counts: [i64; 4],
    scales: [f64; 4],
    positions: [f64; 4],
    test_mode: Option<TestMode>,
    /// Pattern selected while test mode is off (split control only)
    selected_pattern: TestPattern,
    rng: Lcg,
    outbox: VecDeque<Vec<u8>>,
}

impl SimulatedDro {
    pub fn new(profile: DeviceProfile) -> Self {
        Self {
            profile,
            counts: [0; 4],
            scales: [1.0; 4],
            positions: [0.0; 4],
            test_mode: None,
            selected_pattern: TestPattern::SineWave,
            rng: Lcg(0x1234_5678),
            outbox: VecDeque::new(),
        }
    }

    /// Set raw encoder counts, as if the machine had moved.
    pub fn set_counts(&mut self, counts: [i64; 4]) {
        self.counts = counts;
    }

    /// Queue a response that does not belong to any request.
    pub fn inject_stale(&mut self, frame: Vec<u8>) {
        self.outbox.push_back(frame);
    }

    pub fn test_pattern(&self) -> Option<TestPattern> {
        self.test_mode.as_ref().map(|m| m.pattern)
    }

    fn enable_test_mode(&mut self, pattern: TestPattern) {
        let now = Instant::now();
        self.test_mode = Some(TestMode {
            pattern,
            started: now,
            base: self.positions,
            last_step: now,
        });
        debug!("Simulator test mode: {pattern}");
    }

    fn disable_test_mode(&mut self) {
        self.test_mode = None;
    }

    fn update_positions(&mut self) {
        let Some(mode) = self.test_mode.as_mut() else {
            for i in 0..4 {
                self.positions[i] = self.counts[i] as f64 * self.scales[i];
            }
            return;
        };

        let now = Instant::now();
        let t = now.duration_since(mode.started).as_secs_f64();
        let b = mode.base;
        let p = &mut self.positions;
        match mode.pattern {
            TestPattern::SineWave => {
                p[0] = b[0] + 5.0 * (t * 0.5).sin();
                p[1] = b[1] + 3.0 * (t * 0.7 + 1.57).sin();
                p[2] = b[2] + 2.0 * (t * 0.3).sin();
                p[3] = b[3] + 45.0 * (t * 0.2).sin();
            }
            TestPattern::Circular => {
                let radius = 10.0;
                let angular_velocity = 0.5;
                p[0] = b[0] + radius * (t * angular_velocity).cos();
                p[1] = b[1] + radius * (t * angular_velocity).sin();
                p[2] = b[2] + (t * 0.1).sin();
                p[3] = b[3] + t * 5.0;
            }
            TestPattern::LinearRamp => {
                p[0] = b[0] + t * 2.0;
                p[1] = b[1] + t * 1.5;
                p[2] = b[2] + t * 0.5;
                p[3] = b[3] + t * 10.0;
            }
            TestPattern::RandomWalk => {
                if now.duration_since(mode.last_step) >= RANDOM_WALK_PERIOD {
                    p[0] += self.rng.next_centered() * 0.02;
                    p[1] += self.rng.next_centered() * 0.02;
                    p[2] += self.rng.next_centered() * 0.01;
                    p[3] += self.rng.next_centered() * 0.1;
                    mode.last_step = now;
                }
            }
        }
    }

    /// Handle one OUT packet. Unknown bytes are skipped, as on the device.
    fn process(&mut self, packet: &[u8]) {
        let profile = &self.profile;
        let position_code = profile.position.code;
        let scale = profile.scale;
        let reset_code = profile.reset_code;
        let test_mode = profile.test_mode;

        let mut i = 0;
        while i < packet.len() {
            let code = packet[i];
            let params = &packet[i + 1..];

            if code == position_code {
                self.update_positions();
                let sample = Sample::from_array(self.positions);
                self.outbox
                    .push_back(encode(sample, self.profile.position.framing));
            } else if let Some(s) = scale.filter(|s| s.get.code == code) {
                self.outbox
                    .push_back(encode(Sample::from_array(self.scales), s.get.framing));
            } else if scale.is_some_and(|s| s.set_code == code) {
                if params.len() >= 9 {
                    let axis = params[0] as usize;
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(&params[1..9]);
                    if axis < 4 {
                        self.scales[axis] = f64::from_le_bytes(raw);
                    }
                    i += 9;
                }
            } else if reset_code == Some(code) {
                if let Some(&axis) = params.first() {
                    if (axis as usize) < 4 {
                        self.counts[axis as usize] = 0;
                    }
                    i += 1;
                }
            } else if let Some(control) = test_mode {
                i += self.process_test_mode(control, code, params);
            }

            i += 1;
        }
    }

    /// Returns the number of parameter bytes consumed.
    fn process_test_mode(&mut self, control: TestModeControl, code: u8, params: &[u8]) -> usize {
        match control {
            TestModeControl::ModeByte { code: mode_code } if code == mode_code => {
                let Some(&mode) = params.first() else {
                    return 0;
                };
                if mode == 0 {
                    self.disable_test_mode();
                } else if let Some(pattern) = TestPattern::from_index(mode - 1) {
                    self.enable_test_mode(pattern);
                }
                1
            }
            TestModeControl::Split {
                enable,
                disable,
                select_pattern,
            } => {
                if code == enable {
                    if self.test_mode.is_none() {
                        self.enable_test_mode(self.selected_pattern);
                    }
                    0
                } else if code == disable {
                    self.disable_test_mode();
                    0
                } else if code == select_pattern {
                    let Some(&index) = params.first() else {
                        return 0;
                    };
                    if let Some(pattern) = TestPattern::from_index(index) {
                        self.selected_pattern = pattern;
                        if self.test_mode.is_some() {
                            self.enable_test_mode(pattern);
                        }
                    }
                    1
                } else {
                    0
                }
            }
            _ => 0,
        }
    }
}

impl Transport for SimulatedDro {
    fn write(&mut self, data: &[u8], _timeout: Duration) -> DroResult<usize> {
        self.process(data);
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> DroResult<usize> {
        let frame = self.outbox.pop_front().ok_or(DroError::Timeout)?;
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        Ok(n)
    }
}
