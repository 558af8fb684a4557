//! Rate-limited polling loop and session statistics.
//!
//! [`run_poll`] calls [`PositionSampler::read_position`] at a target rate until
//! a duration bound, an attempt limit, cancellation, or an observer abort ends
//! the session. Scheduling is deadline based: each attempt moves the deadline
//! forward by one interval, and if an attempt overran so far that the new
//! deadline is already in the past the deadline snaps to "now" instead of
//! building a backlog of catch-up attempts.
//!
//! The loop returns a [`PollReport`] on every exit path, so a summary can
//! always be printed from whatever was accumulated.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::error::{DroError, DroResult};
use crate::frame::Sample;
use crate::pattern::TestPattern;
use crate::sampler::PositionSampler;
use crate::transport::Transport;

/// Longest single sleep between deadline checks.
pub const MAX_YIELD: Duration = Duration::from_millis(1);

/// Attempt and outcome counters for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollState {
    pub attempts: u64,
    pub successes: u64,
    pub timeouts: u64,
    pub short_frames: u64,
    pub sentinel_mismatches: u64,
    pub channel_errors: u64,
    /// Time since the session started
    pub elapsed: Duration,
    /// Offset of the latest attempt's request from the session start
    pub attempt_started: Duration,
}

impl PollState {
    /// Count the outcome of one attempt.
    pub fn record(&mut self, outcome: &Result<Sample, DroError>) {
        self.attempts += 1;
        match outcome {
            Ok(_) => self.successes += 1,
            Err(DroError::Timeout) => self.timeouts += 1,
            Err(DroError::ShortFrame { .. }) => self.short_frames += 1,
            Err(DroError::SentinelMismatch { .. }) => self.sentinel_mismatches += 1,
            Err(_) => self.channel_errors += 1,
        }
    }

    /// Attempts that produced no sample.
    pub fn missed(&self) -> u64 {
        self.attempts - self.successes
    }

    /// Fraction of attempts that succeeded, `0.0` before the first attempt.
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }

    /// Attempts per second.
    pub fn observed_rate(&self) -> f64 {
        per_second(self.attempts, self.elapsed)
    }

    /// Successful samples per second.
    pub fn observed_success_rate(&self) -> f64 {
        per_second(self.successes, self.elapsed)
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// Running per-axis extents, seeded by the first successful sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionStats {
    pub start: Sample,
    pub last: Sample,
    pub min: Sample,
    pub max: Sample,
}

impl PositionStats {
    pub fn new(first: Sample) -> Self {
        Self {
            start: first,
            last: first,
            min: first,
            max: first,
        }
    }

    pub fn update(&mut self, sample: Sample) {
        self.last = sample;
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
    }

    /// `max - min` per axis.
    pub fn range(&self) -> Sample {
        self.max.sub(self.min)
    }

    /// Offset of `sample` from the first sample of the session.
    pub fn delta(&self, sample: Sample) -> Sample {
        sample.sub(self.start)
    }
}

/// Fold a sample into optional stats, seeding them on first use.
pub fn track(stats: &mut Option<PositionStats>, sample: Sample) -> &PositionStats {
    if let Some(s) = stats.as_mut() {
        s.update(sample);
    }
    stats.get_or_insert_with(|| PositionStats::new(sample))
}

/// Next-attempt deadline.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    next: Instant,
    interval: Duration,
}

impl Schedule {
    /// First attempt is due immediately at `start`.
    ///
    /// A zero interval polls as fast as the device answers.
    pub fn new(start: Instant, interval: Duration) -> Self {
        Self {
            next: start,
            interval,
        }
    }

    /// Interval for a target rate; non-positive or non-finite rates mean
    /// "no rate limit".
    pub fn interval_for_rate(rate_hz: f64) -> Duration {
        if rate_hz.is_finite() && rate_hz > 0.0 {
            Duration::from_secs_f64(1.0 / rate_hz)
        } else {
            Duration::ZERO
        }
    }

    pub fn due(&self, now: Instant) -> bool {
        now >= self.next
    }

    pub fn next(&self) -> Instant {
        self.next
    }

    /// Move the deadline after an attempt finished at `now`.
    pub fn advance(&mut self, now: Instant) {
        if self.interval.is_zero() {
            self.next = now;
            return;
        }
        self.next += self.interval;
        if self.next < now {
            self.next = now;
        }
    }

    /// Time left until the deadline.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.next.saturating_duration_since(now)
    }
}

/// Bounds for one polling session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollConfig {
    /// Target attempts per second; `0` polls without a rate limit
    pub rate_hz: f64,
    /// Stop once this much time has elapsed
    pub duration: Option<Duration>,
    /// Stop after this many attempts
    pub max_attempts: Option<u64>,
}

impl PollConfig {
    pub fn new(rate_hz: f64) -> Self {
        Self {
            rate_hz,
            duration: None,
            max_attempts: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u64) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new(100.0)
    }
}

/// What the loop should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissAction {
    Continue,
    Abort,
}

/// Consumer of poll loop events.
pub trait PollObserver {
    /// Called for every decoded sample. An error aborts the session.
    fn on_sample(
        &mut self,
        _sample: &Sample,
        _state: &PollState,
        _stats: &PositionStats,
    ) -> Result<(), DroError> {
        Ok(())
    }

    /// Called for every failed attempt.
    ///
    /// By default transient failures are skipped and anything else aborts.
    fn on_miss(&mut self, error: &DroError, _state: &PollState) -> MissAction {
        if error.is_transient() {
            MissAction::Continue
        } else {
            MissAction::Abort
        }
    }
}

/// Observer that keeps the default policy and ignores samples.
impl PollObserver for () {}

/// Why a session ended.
#[derive(Debug)]
pub enum StopReason {
    DurationElapsed,
    AttemptLimit,
    Cancelled,
    /// Observer aborted on this error
    Aborted(DroError),
}

/// Outcome of [`run_poll`].
#[derive(Debug)]
pub struct PollReport {
    pub state: PollState,
    /// `None` if no attempt succeeded
    pub stats: Option<PositionStats>,
    pub stop: StopReason,
}

/// Poll positions until a bound is hit.
///
/// Cancellation is checked once per iteration, never during an exchange.
pub fn run_poll<T, C, O>(
    sampler: &mut PositionSampler<T>,
    clock: &C,
    cancel: &CancelToken,
    config: &PollConfig,
    observer: &mut O,
) -> PollReport
where
    T: Transport,
    C: Clock,
    O: PollObserver + ?Sized,
{
    let start = clock.now();
    let mut schedule = Schedule::new(start, Schedule::interval_for_rate(config.rate_hz));
    let mut state = PollState::default();
    let mut stats: Option<PositionStats> = None;

    debug!(
        "Polling at {} Hz (duration {:?}, max attempts {:?})",
        config.rate_hz, config.duration, config.max_attempts
    );

    let stop = loop {
        if cancel.is_cancelled() {
            break StopReason::Cancelled;
        }

        let now = clock.now();
        state.elapsed = now - start;
        if config.duration.is_some_and(|d| state.elapsed >= d) {
            break StopReason::DurationElapsed;
        }
        if config.max_attempts.is_some_and(|n| state.attempts >= n) {
            break StopReason::AttemptLimit;
        }

        if schedule.due(now) {
            state.attempt_started = now - start;
            let outcome = sampler.read_position();
            state.record(&outcome);

            let finished = clock.now();
            state.elapsed = finished - start;

            match outcome {
                Ok(sample) => {
                    let current = track(&mut stats, sample);
                    if let Err(e) = observer.on_sample(&sample, &state, current) {
                        warn!("Sample consumer failed: {e}");
                        break StopReason::Aborted(e);
                    }
                }
                Err(e) => {
                    if observer.on_miss(&e, &state) == MissAction::Abort {
                        warn!("Polling aborted: {e}");
                        break StopReason::Aborted(e);
                    }
                }
            }

            schedule.advance(finished);
        }

        let remaining = schedule.remaining(clock.now());
        if !remaining.is_zero() {
            clock.sleep(remaining.min(MAX_YIELD));
        }
    };

    state.elapsed = clock.now() - start;
    PollReport { state, stats, stop }
}

/// Poll with a firmware test pattern running for the whole session.
///
/// The pattern is switched on immediately before the first attempt and back
/// off once the loop ends, whatever the stop reason. An error is returned
/// only when the pattern cannot be enabled; test mode is still switched off
/// in that case since split control may have been partly applied. A failed
/// disable is logged and does not replace the report.
pub fn run_poll_with_pattern<T, C, O>(
    sampler: &mut PositionSampler<T>,
    pattern: TestPattern,
    clock: &C,
    cancel: &CancelToken,
    config: &PollConfig,
    observer: &mut O,
) -> DroResult<PollReport>
where
    T: Transport,
    C: Clock,
    O: PollObserver + ?Sized,
{
    if let Err(e) = sampler.set_test_mode(Some(pattern)) {
        disable_test_mode(sampler);
        return Err(e);
    }

    let report = run_poll(sampler, clock, cancel, config, observer);
    disable_test_mode(sampler);
    Ok(report)
}

fn disable_test_mode<T: Transport>(sampler: &mut PositionSampler<T>) {
    if let Err(e) = sampler.set_test_mode(None) {
        warn!("Failed to disable test pattern: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_summary_rates() {
        let state = PollState {
            attempts: 100,
            successes: 80,
            elapsed: Duration::from_secs(10),
            ..Default::default()
        };
        assert_relative_eq!(state.success_rate(), 0.8);
        assert_relative_eq!(state.observed_success_rate(), 8.0);
        assert_relative_eq!(state.observed_rate(), 10.0);
        assert_eq!(state.missed(), 20);
    }

    #[test]
    fn test_rates_are_zero_before_anything_happens() {
        let state = PollState::default();
        assert_eq!(state.success_rate(), 0.0);
        assert_eq!(state.observed_rate(), 0.0);
        assert_eq!(state.observed_success_rate(), 0.0);
    }

    #[test]
    fn test_record_keeps_miss_kinds_distinct() {
        let mut state = PollState::default();
        state.record(&Ok(Sample::default()));
        state.record(&Err(DroError::Timeout));
        state.record(&Err(DroError::ShortFrame {
            expected: 36,
            actual: 0,
        }));
        state.record(&Err(DroError::SentinelMismatch {
            expected: 1,
            found: 2,
        }));
        state.record(&Err(DroError::Channel("gone".to_string())));

        assert_eq!(state.attempts, 5);
        assert_eq!(state.successes, 1);
        assert_eq!(state.timeouts, 1);
        assert_eq!(state.short_frames, 1);
        assert_eq!(state.sentinel_mismatches, 1);
        assert_eq!(state.channel_errors, 1);
        assert_eq!(state.missed(), 4);
    }

    #[test]
    fn test_position_stats_range() {
        let mut stats = None;
        track(&mut stats, Sample::new(1.0, 1.0, 1.0, 1.0));
        track(&mut stats, Sample::new(3.0, -1.0, 2.0, 1.0));
        let stats = *track(&mut stats, Sample::new(2.0, 0.0, 5.0, 1.0));

        assert_eq!(stats.range(), Sample::new(2.0, 2.0, 4.0, 0.0));
        assert_eq!(stats.start, Sample::new(1.0, 1.0, 1.0, 1.0));
        assert_eq!(stats.last, Sample::new(2.0, 0.0, 5.0, 1.0));
        assert_eq!(stats.min, Sample::new(1.0, -1.0, 1.0, 1.0));
        assert_eq!(stats.max, Sample::new(3.0, 1.0, 5.0, 1.0));
    }

    #[test]
    fn test_first_sample_seeds_stats() {
        let stats = PositionStats::new(Sample::new(-4.0, 2.0, 0.5, 90.0));
        assert_eq!(stats.range(), Sample::default());
        assert_eq!(
            stats.delta(Sample::new(-3.0, 2.0, 0.0, 45.0)),
            Sample::new(1.0, 0.0, -0.5, -45.0)
        );
    }

    #[test]
    fn test_schedule_advances_by_interval() {
        let t0 = Instant::now();
        let mut schedule = Schedule::new(t0, Duration::from_millis(100));
        assert!(schedule.due(t0));

        schedule.advance(t0 + Duration::from_millis(5));
        assert_eq!(schedule.next(), t0 + Duration::from_millis(100));
        assert!(!schedule.due(t0 + Duration::from_millis(99)));
        assert_eq!(
            schedule.remaining(t0 + Duration::from_millis(40)),
            Duration::from_millis(60)
        );
    }

    #[test]
    fn test_schedule_snaps_to_now_when_behind() {
        let t0 = Instant::now();
        let mut schedule = Schedule::new(t0, Duration::from_millis(100));

        // Attempt took two intervals
        let finished = t0 + Duration::from_millis(200);
        schedule.advance(finished);
        assert_eq!(schedule.next(), finished);

        // And again: the deadline tracks the overrun instead of accumulating debt
        let finished = finished + Duration::from_millis(200);
        schedule.advance(finished);
        assert_eq!(schedule.next(), finished);
        assert!(schedule.remaining(finished).is_zero());
    }

    #[test]
    fn test_interval_for_rate() {
        assert_eq!(
            Schedule::interval_for_rate(10.0),
            Duration::from_millis(100)
        );
        assert_eq!(Schedule::interval_for_rate(0.0), Duration::ZERO);
        assert_eq!(Schedule::interval_for_rate(-5.0), Duration::ZERO);
        assert_eq!(Schedule::interval_for_rate(f64::NAN), Duration::ZERO);
    }

    #[test]
    fn test_default_miss_policy() {
        let mut observer = ();
        let state = PollState::default();
        assert_eq!(
            observer.on_miss(&DroError::Timeout, &state),
            MissAction::Continue
        );
        assert_eq!(
            observer.on_miss(&DroError::Channel("x".to_string()), &state),
            MissAction::Abort
        );
    }
}
