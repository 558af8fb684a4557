//! End-to-end poll loop behavior against scripted and simulated devices.

use std::time::Duration;

use approx::assert_relative_eq;
use dro::frame::{encode, POSITION_SENTINEL};
use dro::mock::ScriptedTransport;
use dro::sim::SimulatedDro;
use dro::{
    run_poll, run_poll_with_pattern, CancelToken, DeviceProfile, DroError, Framing, ManualClock,
    PollConfig, PollObserver, PollState, PositionSampler, PositionStats, Sample, StopReason,
    TestPattern,
};

fn position_frame(sample: Sample) -> Vec<u8> {
    encode(sample, Framing::Sentinel(POSITION_SENTINEL))
}

fn scripted(frames: usize) -> ScriptedTransport {
    let mut transport = ScriptedTransport::new();
    for i in 0..frames {
        transport.push_frame(position_frame(Sample::new(i as f64, 0.0, 0.0, 0.0)));
    }
    transport
}

/// Records when every successful attempt started and finished.
#[derive(Default)]
struct Recorder {
    sample_times: Vec<Duration>,
    attempt_starts: Vec<Duration>,
    cancel_after: Option<(usize, CancelToken)>,
    fail_with: Option<fn() -> DroError>,
}

impl PollObserver for Recorder {
    fn on_sample(
        &mut self,
        _sample: &Sample,
        state: &PollState,
        _stats: &PositionStats,
    ) -> Result<(), DroError> {
        self.sample_times.push(state.elapsed);
        self.attempt_starts.push(state.attempt_started);
        if let Some(make_error) = self.fail_with {
            return Err(make_error());
        }
        if let Some((n, token)) = &self.cancel_after {
            if self.sample_times.len() >= *n {
                token.cancel();
            }
        }
        Ok(())
    }
}

fn millis(values: &[u64]) -> Vec<Duration> {
    values.iter().map(|&ms| Duration::from_millis(ms)).collect()
}

#[test]
fn test_rate_limited_attempt_count() {
    let clock = ManualClock::new();
    let mut sampler = PositionSampler::new(scripted(20), DeviceProfile::rp2040());
    let config = PollConfig::new(10.0).with_duration(Duration::from_secs(1));
    let mut recorder = Recorder::default();

    let report = run_poll(
        &mut sampler,
        &clock,
        &CancelToken::new(),
        &config,
        &mut recorder,
    );

    assert!(matches!(report.stop, StopReason::DurationElapsed));
    assert_eq!(report.state.attempts, 10);
    assert_eq!(report.state.successes, 10);
    assert_eq!(
        recorder.sample_times,
        millis(&[0, 100, 200, 300, 400, 500, 600, 700, 800, 900])
    );
    assert_eq!(report.state.elapsed, Duration::from_secs(1));
}

#[test]
fn test_slow_attempts_do_not_burst() {
    let clock = ManualClock::new();
    let mut transport = ScriptedTransport::new().with_clock(clock.clone(), Duration::from_millis(200));
    for _ in 0..10 {
        transport.push_frame(position_frame(Sample::default()));
    }
    let mut sampler = PositionSampler::new(transport, DeviceProfile::rp2040());
    let config = PollConfig::new(10.0).with_duration(Duration::from_secs(1));
    let mut recorder = Recorder::default();

    let report = run_poll(
        &mut sampler,
        &clock,
        &CancelToken::new(),
        &config,
        &mut recorder,
    );

    // Each exchange takes two intervals; the schedule snaps instead of
    // firing catch-up attempts back to back.
    assert_eq!(report.state.attempts, 5);
    assert_eq!(recorder.sample_times, millis(&[200, 400, 600, 800, 1000]));
    assert_eq!(recorder.attempt_starts, millis(&[0, 200, 400, 600, 800]));
    assert_relative_eq!(report.state.observed_rate(), 5.0);
}

#[test]
fn test_misses_are_counted_and_skipped() {
    let clock = ManualClock::new();
    let mut transport = ScriptedTransport::new();
    transport
        .push_frame(position_frame(Sample::new(1.0, 1.0, 1.0, 1.0)))
        .push_error(DroError::Timeout)
        .push_frame(vec![0u8; 10])
        .push_frame(position_frame(Sample::new(3.0, -1.0, 2.0, 1.0)))
        .push_frame(position_frame(Sample::new(2.0, 0.0, 5.0, 1.0)));
    let mut sampler = PositionSampler::new(transport, DeviceProfile::rp2040());
    let config = PollConfig::new(0.0).with_max_attempts(5);

    let report = run_poll(&mut sampler, &clock, &CancelToken::new(), &config, &mut ());

    assert!(matches!(report.stop, StopReason::AttemptLimit));
    assert_eq!(report.state.attempts, 5);
    assert_eq!(report.state.successes, 3);
    assert_eq!(report.state.timeouts, 1);
    assert_eq!(report.state.short_frames, 1);
    assert_relative_eq!(report.state.success_rate(), 0.6);

    let stats = report.stats.unwrap();
    assert_eq!(stats.range(), Sample::new(2.0, 2.0, 4.0, 0.0));
}

#[test]
fn test_stale_frame_is_drained_within_the_loop() {
    let clock = ManualClock::new();
    let mut transport = ScriptedTransport::new();
    transport
        .push_frame(encode(Sample::default(), Framing::Sentinel(0xDEAD_BEEF)))
        .push_frame(position_frame(Sample::new(9.0, 9.0, 9.0, 9.0)))
        .push_error(DroError::Timeout)
        .push_frame(position_frame(Sample::new(1.0, 2.0, 3.0, 4.0)));
    let mut sampler = PositionSampler::new(transport, DeviceProfile::rp2040());
    let config = PollConfig::new(100.0).with_max_attempts(2);

    let report = run_poll(&mut sampler, &clock, &CancelToken::new(), &config, &mut ());

    assert_eq!(report.state.sentinel_mismatches, 1);
    assert_eq!(report.state.successes, 1);
    assert_eq!(
        report.stats.unwrap().last,
        Sample::new(1.0, 2.0, 3.0, 4.0)
    );
    assert_eq!(sampler.transport().pending_reads(), 0);
}

#[test]
fn test_channel_error_aborts_with_counters() {
    let clock = ManualClock::new();
    let mut transport = ScriptedTransport::new();
    transport
        .push_frame(position_frame(Sample::new(1.0, 0.0, 0.0, 0.0)))
        .push_error(DroError::Channel("device disconnected".to_string()))
        .push_frame(position_frame(Sample::default()));
    let mut sampler = PositionSampler::new(transport, DeviceProfile::rp2040());
    let config = PollConfig::new(50.0);

    let report = run_poll(&mut sampler, &clock, &CancelToken::new(), &config, &mut ());

    assert!(matches!(
        report.stop,
        StopReason::Aborted(DroError::Channel(_))
    ));
    assert_eq!(report.state.attempts, 2);
    assert_eq!(report.state.successes, 1);
    assert_eq!(report.state.channel_errors, 1);
    assert!(report.stats.is_some());
}

#[test]
fn test_cancellation_preserves_counters() {
    let clock = ManualClock::new();
    let cancel = CancelToken::new();
    let mut sampler = PositionSampler::new(scripted(10), DeviceProfile::rp2040());
    let config = PollConfig::new(100.0);
    let mut recorder = Recorder {
        cancel_after: Some((3, cancel.clone())),
        ..Default::default()
    };

    let report = run_poll(&mut sampler, &clock, &cancel, &config, &mut recorder);

    assert!(matches!(report.stop, StopReason::Cancelled));
    assert_eq!(report.state.attempts, 3);
    assert_eq!(report.state.successes, 3);
    assert_eq!(report.stats.unwrap().last, Sample::new(2.0, 0.0, 0.0, 0.0));
}

#[test]
fn test_already_cancelled_makes_no_attempts() {
    let clock = ManualClock::new();
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut sampler = PositionSampler::new(scripted(1), DeviceProfile::rp2040());

    let report = run_poll(
        &mut sampler,
        &clock,
        &cancel,
        &PollConfig::default(),
        &mut (),
    );

    assert!(matches!(report.stop, StopReason::Cancelled));
    assert_eq!(report.state.attempts, 0);
    assert!(report.stats.is_none());
    assert!(sampler.transport().writes().is_empty());
}

#[test]
fn test_simulated_legacy_device_in_test_mode() {
    let clock = ManualClock::new();
    let profile = DeviceProfile::pico();
    let mut sampler = PositionSampler::new(SimulatedDro::new(profile.clone()), profile);
    sampler.set_test_mode(Some(TestPattern::SineWave)).unwrap();

    let config = PollConfig::new(100.0).with_duration(Duration::from_millis(500));
    let report = run_poll(&mut sampler, &clock, &CancelToken::new(), &config, &mut ());

    assert_eq!(report.state.attempts, 50);
    assert_eq!(report.state.successes, 50);
    assert_eq!(sampler.transport().test_pattern(), Some(TestPattern::SineWave));

    sampler.set_test_mode(None).unwrap();
    assert_eq!(sampler.transport().test_pattern(), None);
}

fn log_write_failure() -> DroError {
    DroError::Io(std::io::Error::new(
        std::io::ErrorKind::StorageFull,
        "no space left on device",
    ))
}

#[test]
fn test_pattern_is_disabled_after_consumer_failure() {
    let clock = ManualClock::new();
    let mut sampler = PositionSampler::new(scripted(5), DeviceProfile::rp2040());
    let config = PollConfig::new(100.0);
    let mut recorder = Recorder {
        fail_with: Some(log_write_failure),
        ..Default::default()
    };

    let report = run_poll_with_pattern(
        &mut sampler,
        TestPattern::SineWave,
        &clock,
        &CancelToken::new(),
        &config,
        &mut recorder,
    )
    .unwrap();

    assert!(matches!(report.stop, StopReason::Aborted(DroError::Io(_))));
    assert_eq!(report.state.successes, 1);
    assert_eq!(
        sampler.transport().writes(),
        &[vec![0x02, 0x01], vec![0x01], vec![0x02, 0x00]]
    );
}

#[test]
fn test_pattern_is_disabled_when_enable_fails() {
    let clock = ManualClock::new();
    let mut transport = scripted(1);
    transport.fail_next_write(DroError::Channel("pipe error".to_string()));
    let mut sampler = PositionSampler::new(transport, DeviceProfile::rp2040());

    let result = run_poll_with_pattern(
        &mut sampler,
        TestPattern::Circular,
        &clock,
        &CancelToken::new(),
        &PollConfig::default(),
        &mut (),
    );

    assert!(matches!(result, Err(DroError::Channel(_))));
    // No position request went out; only the disable followed the failed enable
    assert_eq!(sampler.transport().writes(), &[vec![0x02, 0x00]]);
    assert_eq!(sampler.transport().read_calls(), 0);
}

#[test]
fn test_legacy_pattern_is_disabled_after_cancellation() {
    let clock = ManualClock::new();
    let cancel = CancelToken::new();
    let profile = DeviceProfile::pico();
    let mut sampler = PositionSampler::new(SimulatedDro::new(profile.clone()), profile);
    let mut recorder = Recorder {
        cancel_after: Some((2, cancel.clone())),
        ..Default::default()
    };

    let report = run_poll_with_pattern(
        &mut sampler,
        TestPattern::LinearRamp,
        &clock,
        &cancel,
        &PollConfig::new(100.0),
        &mut recorder,
    )
    .unwrap();

    assert!(matches!(report.stop, StopReason::Cancelled));
    assert_eq!(report.state.successes, 2);
    assert_eq!(sampler.transport().test_pattern(), None);
}
