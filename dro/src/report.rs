//! Human-readable rendering of samples and session summaries.

use std::fmt::Write;

use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::frame::{Axis, Sample};
use crate::poll::{PollReport, PollState, PositionStats, StopReason};

const RULE_WIDTH: usize = 80;

/// Per-sample display format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DisplayMode {
    /// Absolute positions
    #[default]
    Simple,
    /// Offset from the first sample of the session
    Delta,
    /// Positions plus sample rate, success percentage and elapsed time
    Detailed,
    /// Positions with the running range of each axis
    Stats,
}

fn positions(s: &Sample, prefix: &str) -> String {
    format!(
        "{prefix}X:{:8.3} {prefix}Y:{:8.3} {prefix}Z:{:8.3} {prefix}A:{:8.1}",
        s.x, s.y, s.z, s.a
    )
}

/// Render one sample for the live display.
///
/// `stats` must already include `sample`.
pub fn format_line(
    mode: DisplayMode,
    sample: &Sample,
    state: &PollState,
    stats: &PositionStats,
) -> String {
    match mode {
        DisplayMode::Simple => positions(sample, ""),
        DisplayMode::Delta => positions(&stats.delta(*sample), "Δ"),
        DisplayMode::Detailed => format!(
            "{} | {:6.1} Hz | {:5.1}% | {:7.1}s",
            positions(sample, ""),
            state.observed_success_rate(),
            state.success_rate() * 100.0,
            state.elapsed.as_secs_f64()
        ),
        DisplayMode::Stats => {
            let r = stats.range();
            format!(
                "X:{:8.3} (R:{:6.3}) Y:{:8.3} (R:{:6.3}) Z:{:8.3} (R:{:6.3}) A:{:8.1} (R:{:6.1})",
                sample.x, r.x, sample.y, r.y, sample.z, r.z, sample.a, r.a
            )
        }
    }
}

/// Line printed for an attempt that produced no sample.
pub fn format_miss(attempt: u64, error: &dyn std::fmt::Display) -> String {
    format!("[{attempt:6}] No response ({error})")
}

fn stop_description(stop: &StopReason) -> String {
    match stop {
        StopReason::DurationElapsed => "duration elapsed".to_string(),
        StopReason::AttemptLimit => "attempt limit reached".to_string(),
        StopReason::Cancelled => "interrupted".to_string(),
        StopReason::Aborted(e) => format!("aborted: {e}"),
    }
}

/// Multi-line end-of-session summary.
pub fn format_summary(report: &PollReport) -> String {
    let state = &report.state;
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();

    // Writing to a String cannot fail
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Monitoring Summary");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Stopped: {}", stop_description(&report.stop));
    let _ = writeln!(out, "Duration: {:.2} seconds", state.elapsed.as_secs_f64());
    let _ = writeln!(out, "Total reads: {}", state.attempts);
    let _ = writeln!(out, "Successful reads: {}", state.successes);
    let _ = writeln!(out, "Success rate: {:.1}%", state.success_rate() * 100.0);
    let _ = writeln!(out, "Actual read rate: {:.1} Hz", state.observed_rate());
    let _ = writeln!(
        out,
        "Successful read rate: {:.1} Hz",
        state.observed_success_rate()
    );

    if state.missed() > 0 {
        let _ = writeln!(
            out,
            "Missed: {} timeout, {} short frame, {} sentinel mismatch, {} channel error",
            state.timeouts, state.short_frames, state.sentinel_mismatches, state.channel_errors
        );
    }

    if let Some(stats) = &report.stats {
        let _ = writeln!(out);
        let _ = writeln!(out, "Position Statistics:");
        let _ = writeln!(
            out,
            "{:>4} {:>10} {:>10} {:>10} {:>10} {:>10}",
            "Axis", "Start", "Min", "Max", "Range", "Current"
        );
        let _ = writeln!(out, "{}", "-".repeat(66));
        let range = stats.range();
        for axis in Axis::iter() {
            let _ = writeln!(
                out,
                "{:>4} {:>10.3} {:>10.3} {:>10.3} {:>10.3} {:>10.3}",
                axis.to_string(),
                stats.start[axis],
                stats.min[axis],
                stats.max[axis],
                range[axis],
                stats.last[axis]
            );
        }
    }

    out
}
