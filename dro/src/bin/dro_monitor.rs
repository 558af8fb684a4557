//! Continuous position monitor for the USB DRO.
//!
//! Polls the device at a fixed rate and shows every sample in one of several
//! display modes, optionally logging to CSV. A summary with read statistics
//! and per-axis extents is printed on exit, including after Ctrl+C.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use dro::log::PositionLog;
use dro::report::{format_line, format_miss, format_summary, DisplayMode};
use dro::session::{backend_for, Connection};
use dro::{
    run_poll, run_poll_with_pattern, CancelToken, DeviceProfile, DroError, MissAction, PollConfig,
    PollObserver, PollState, PositionStats, Sample, StopReason, SystemClock, TestPattern,
};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Absolute positions
    Simple,
    /// Offset from the first reading
    Delta,
    /// Positions with read rate and success percentage
    Detailed,
    /// Positions with the running range of each axis
    Stats,
}

impl From<ModeArg> for DisplayMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Simple => DisplayMode::Simple,
            ModeArg::Delta => DisplayMode::Delta,
            ModeArg::Detailed => DisplayMode::Detailed,
            ModeArg::Stats => DisplayMode::Stats,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PatternArg {
    Sine,
    Circular,
    Ramp,
    RandomWalk,
}

impl From<PatternArg> for TestPattern {
    fn from(arg: PatternArg) -> Self {
        match arg {
            PatternArg::Sine => TestPattern::SineWave,
            PatternArg::Circular => TestPattern::Circular,
            PatternArg::Ramp => TestPattern::LinearRamp,
            PatternArg::RandomWalk => TestPattern::RandomWalk,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Continuous position monitor for the USB encoder interface"
)]
struct Args {
    /// Update rate in Hz (0 = as fast as the device answers)
    #[arg(short, long, default_value = "100")]
    rate: f64,

    /// Monitoring duration in seconds (default: until Ctrl+C)
    #[arg(short, long)]
    duration: Option<f64>,

    /// Display mode
    #[arg(short, long, value_enum, default_value = "simple")]
    mode: ModeArg,

    /// Log positions to a timestamped CSV file
    #[arg(short, long)]
    log: bool,

    /// Directory for the CSV log
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,

    /// Print each update on a new line
    #[arg(short, long)]
    newline: bool,

    /// Suppress position output (only show summary)
    #[arg(short, long)]
    quiet: bool,

    /// Show misses and debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Stop after this many read attempts
    #[arg(short, long)]
    count: Option<u64>,

    /// Device profile: built-in name (rp2040, pico) or path to a JSON profile
    #[arg(short, long, default_value = "rp2040")]
    profile: String,

    /// Run a firmware test pattern for the session
    #[arg(long, value_enum)]
    test_pattern: Option<PatternArg>,

    /// Use the built-in firmware simulator instead of USB
    #[arg(long)]
    simulate: bool,

    /// Keep polling after channel errors instead of aborting
    #[arg(long)]
    keep_going: bool,
}

/// Console and CSV sink for poll loop events.
struct Monitor {
    mode: DisplayMode,
    newline: bool,
    quiet: bool,
    verbose: bool,
    keep_going: bool,
    log: Option<PositionLog>,
}

impl Monitor {
    fn emit(&self, line: &str) {
        if self.newline {
            println!("{line}");
        } else {
            print!("\r{line}");
            std::io::stdout().flush().ok();
        }
    }
}

impl PollObserver for Monitor {
    fn on_sample(
        &mut self,
        sample: &Sample,
        state: &PollState,
        stats: &PositionStats,
    ) -> Result<(), DroError> {
        if let Some(log) = self.log.as_mut() {
            log.append(sample, state.attempt_started)?;
        }
        if !self.quiet {
            let line = format_line(self.mode, sample, state, stats);
            self.emit(&format!("[{:6}] {line}", state.successes));
        }
        Ok(())
    }

    fn on_miss(&mut self, error: &DroError, state: &PollState) -> MissAction {
        if self.verbose && !self.quiet {
            let line = format_miss(state.attempts, error);
            if self.newline {
                self.emit(&line);
            } else {
                self.emit(&format!("{line:<100}"));
            }
        }

        if error.is_transient() {
            MissAction::Continue
        } else if self.keep_going && !error.is_fatal() {
            warn!("Continuing after {error}");
            MissAction::Continue
        } else {
            MissAction::Abort
        }
    }
}

fn poll_config(args: &Args) -> Result<PollConfig> {
    let mut config = PollConfig::new(args.rate);
    if let Some(secs) = args.duration {
        let duration = Duration::try_from_secs_f64(secs)
            .with_context(|| format!("invalid duration: {secs}"))?;
        config = config.with_duration(duration);
    }
    if let Some(count) = args.count {
        config = config.with_max_attempts(count);
    }
    Ok(config)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if let Some(tips) = e.downcast_ref::<DroError>().and_then(DroError::remediation) {
                eprintln!("\nTroubleshooting tips:\n{tips}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let profile = DeviceProfile::resolve(&args.profile)?;
    let config = poll_config(&args)?;
    let cancel = CancelToken::on_interrupt().context("failed to install Ctrl+C handler")?;

    let log = if args.log {
        std::fs::create_dir_all(&args.log_dir).with_context(|| {
            format!("failed to create log directory {}", args.log_dir.display())
        })?;
        let log = PositionLog::create_in(&args.log_dir).with_context(|| {
            format!("failed to open position log in {}", args.log_dir.display())
        })?;
        info!("Logging positions to: {}", log.path().display());
        Some(log)
    } else {
        None
    };

    info!(
        "Looking for {} DRO ({:04X}:{:04X})...",
        profile.name, profile.vendor_id, profile.product_id
    );
    let mut conn = Connection::open(profile, backend_for(args.simulate))?;
    info!(
        "Found device: {}",
        conn.product.as_deref().unwrap_or("unknown product")
    );
    info!(
        "Serial: {}",
        conn.serial.as_deref().unwrap_or("Unable to read")
    );

    let mode = DisplayMode::from(args.mode);
    println!("Monitoring positions in '{mode}' mode");
    println!("Update rate: {} Hz", args.rate);
    match args.duration {
        Some(d) => println!("Duration: {d} seconds"),
        None => println!("Press Ctrl+C to stop"),
    }
    println!("{}", "-".repeat(80));

    let mut monitor = Monitor {
        mode,
        newline: args.newline,
        quiet: args.quiet,
        verbose: args.verbose,
        keep_going: args.keep_going,
        log,
    };

    // Test mode is switched off inside run_poll_with_pattern on every path
    let report = match args.test_pattern.map(TestPattern::from) {
        Some(pattern) => {
            info!("Running with test pattern: {pattern}");
            run_poll_with_pattern(
                &mut conn.sampler,
                pattern,
                &SystemClock,
                &cancel,
                &config,
                &mut monitor,
            )?
        }
        None => run_poll(&mut conn.sampler, &SystemClock, &cancel, &config, &mut monitor),
    };

    if !args.newline {
        println!();
    }
    println!();
    print!("{}", format_summary(&report));

    if let Some(log) = monitor.log.as_mut() {
        log.flush()
            .with_context(|| format!("failed to flush {}", log.path().display()))?;
        info!("Wrote {} rows to {}", log.rows(), log.path().display());
    }

    Ok(match report.stop {
        StopReason::Aborted(e) => {
            if let Some(tips) = e.remediation() {
                eprintln!("\nTroubleshooting tips:\n{tips}");
            }
            ExitCode::FAILURE
        }
        _ => ExitCode::SUCCESS,
    })
}
