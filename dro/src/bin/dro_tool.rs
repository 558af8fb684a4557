//! Maintenance CLI for the USB DRO.
//!
//! Subcommands:
//! - `probe`: single read, then a short polling run printing every sample
//! - `info`: device identity, profile and current readings
//! - `scale`: read per-axis scale factors
//! - `set-scale`: write one axis scale factor
//! - `reset`: zero one axis encoder count
//! - `test-mode`: start a firmware test pattern or return to live data

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dro::report::format_summary;
use dro::session::{backend_for, describe_setup_failure, Connection};
use dro::{
    run_poll, Axis, CancelToken, DeviceProfile, DroError, MissAction, PollConfig, PollObserver,
    PollState, PositionStats, Sample, SystemClock, TestPattern,
};
use strum::IntoEnumIterator;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AxisArg {
    X,
    Y,
    Z,
    A,
}

impl From<AxisArg> for Axis {
    fn from(arg: AxisArg) -> Self {
        match arg {
            AxisArg::X => Axis::X,
            AxisArg::Y => Axis::Y,
            AxisArg::Z => Axis::Z,
            AxisArg::A => Axis::A,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TestModeArg {
    /// Return to live encoder data
    Off,
    Sine,
    Circular,
    Ramp,
    RandomWalk,
}

impl From<TestModeArg> for Option<TestPattern> {
    fn from(arg: TestModeArg) -> Self {
        match arg {
            TestModeArg::Off => None,
            TestModeArg::Sine => Some(TestPattern::SineWave),
            TestModeArg::Circular => Some(TestPattern::Circular),
            TestModeArg::Ramp => Some(TestPattern::LinearRamp),
            TestModeArg::RandomWalk => Some(TestPattern::RandomWalk),
        }
    }
}

/// USB DRO maintenance tool
#[derive(Parser, Debug)]
#[command(name = "dro_tool")]
#[command(about = "Maintenance tool for the USB encoder interface")]
#[command(version)]
struct Args {
    /// Device profile: built-in name (rp2040, pico) or path to a JSON profile
    #[arg(short, long, global = true, default_value = "rp2040")]
    profile: String,

    /// Use the built-in firmware simulator instead of USB
    #[arg(long, global = true)]
    simulate: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read once, then poll and print every sample
    Probe {
        /// Polling time in seconds
        #[arg(short, long, default_value = "5")]
        duration: f64,

        /// Polling rate in Hz
        #[arg(short, long, default_value = "10")]
        rate: f64,
    },

    /// Show device identity, profile and current readings
    Info,

    /// Read the per-axis scale factors
    Scale,

    /// Set the scale factor (units per count) of one axis
    SetScale {
        #[arg(short, long, value_enum)]
        axis: AxisArg,

        #[arg(long, allow_negative_numbers = true)]
        value: f64,
    },

    /// Zero the encoder count of one axis
    Reset {
        #[arg(short, long, value_enum)]
        axis: AxisArg,
    },

    /// Start a firmware test pattern, or `off` for live data
    TestMode {
        #[arg(value_enum)]
        pattern: TestModeArg,
    },
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
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<DroError>() {
                Some(dro_err) => eprintln!("Error: {}", describe_setup_failure(dro_err)),
                None => eprintln!("Error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let profile = DeviceProfile::resolve(&args.profile)?;
    let mut conn = Connection::open(profile, backend_for(args.simulate))?;

    match args.command {
        Command::Probe { duration, rate } => cmd_probe(&mut conn, duration, rate),
        Command::Info => cmd_info(&mut conn),
        Command::Scale => cmd_scale(&mut conn),
        Command::SetScale { axis, value } => cmd_set_scale(&mut conn, axis.into(), value),
        Command::Reset { axis } => cmd_reset(&mut conn, axis.into()),
        Command::TestMode { pattern } => cmd_test_mode(&mut conn, pattern.into()),
    }
}

fn format_sample(s: &Sample) -> String {
    format!(
        "X={:.4}, Y={:.4}, Z={:.4}, A={:.4}",
        s.x, s.y, s.z, s.a
    )
}

// ==================== Probe Command ====================

/// Prints every sample and every miss.
struct ProbePrinter;

impl PollObserver for ProbePrinter {
    fn on_sample(
        &mut self,
        sample: &Sample,
        state: &PollState,
        _stats: &PositionStats,
    ) -> Result<(), DroError> {
        println!("[{:4}] Positions: {}", state.successes, format_sample(sample));
        Ok(())
    }

    fn on_miss(&mut self, error: &DroError, _state: &PollState) -> MissAction {
        println!("{error}");
        if error.is_transient() {
            MissAction::Continue
        } else {
            MissAction::Abort
        }
    }
}

fn cmd_probe(conn: &mut Connection, duration: f64, rate: f64) -> Result<()> {
    println!("Testing single position read:");
    match conn.sampler.read_position() {
        Ok(sample) => println!("Positions: {}", format_sample(&sample)),
        Err(e) if e.is_transient() => println!("No response: {e}"),
        Err(e) => return Err(e.into()),
    }

    let Ok(duration) = Duration::try_from_secs_f64(duration) else {
        bail!("invalid duration: {duration}");
    };

    println!("\nPolling positions for {:.1} seconds at {} Hz...", duration.as_secs_f64(), rate);
    let cancel = CancelToken::on_interrupt()?;
    let config = PollConfig::new(rate).with_duration(duration);
    let report = run_poll(
        &mut conn.sampler,
        &SystemClock,
        &cancel,
        &config,
        &mut ProbePrinter,
    );

    println!("Received {} position updates\n", report.state.successes);
    print!("{}", format_summary(&report));
    Ok(())
}

// ==================== Info Command ====================

fn cmd_info(conn: &mut Connection) -> Result<()> {
    let profile = conn.sampler.profile().clone();

    println!("Device");
    println!("  Product:   {}", conn.product.as_deref().unwrap_or("unknown"));
    println!("  Serial:    {}", conn.serial.as_deref().unwrap_or("unknown"));
    println!("Profile");
    println!("  Name:      {}", profile.name);
    println!(
        "  USB ID:    {:04X}:{:04X}",
        profile.vendor_id, profile.product_id
    );
    println!(
        "  Endpoints: OUT {:#04x}, IN {:#04x} (interface {})",
        profile.endpoint_out, profile.endpoint_in, profile.interface
    );
    println!("  Framing:   {:?}", profile.position.framing);
    println!(
        "  Timeouts:  request {} ms, drain {} ms",
        profile.request_timeout_ms, profile.drain_timeout_ms
    );
    println!(
        "  Supports:  scale={} reset={} test-mode={}",
        profile.scale.is_some(),
        profile.reset_code.is_some(),
        profile.test_mode.is_some()
    );

    println!("Readings");
    match conn.sampler.read_position() {
        Ok(s) => println!("  Position:  {}", format_sample(&s)),
        Err(e) => println!("  Position:  {e}"),
    }
    if profile.scale.is_some() {
        match conn.sampler.read_scale() {
            Ok(s) => println!("  Scale:     {}", format_sample(&s)),
            Err(e) => println!("  Scale:     {e}"),
        }
    }
    Ok(())
}

// ==================== Scale Commands ====================

fn cmd_scale(conn: &mut Connection) -> Result<()> {
    let scale = conn.sampler.read_scale()?;
    for axis in Axis::iter() {
        println!("{axis}: {:.6}", scale[axis]);
    }
    Ok(())
}

fn cmd_set_scale(conn: &mut Connection, axis: Axis, value: f64) -> Result<()> {
    if !value.is_finite() {
        bail!("scale must be finite, got {value}");
    }
    conn.sampler.set_scale(axis, value)?;
    info!("Scale for axis {axis} set to {value}");
    Ok(())
}

// ==================== Reset / Test Mode ====================

fn cmd_reset(conn: &mut Connection, axis: Axis) -> Result<()> {
    conn.sampler.reset_axis(axis)?;
    info!("Axis {axis} reset to zero");
    Ok(())
}

fn cmd_test_mode(conn: &mut Connection, pattern: Option<TestPattern>) -> Result<()> {
    conn.sampler.set_test_mode(pattern)?;
    match pattern {
        Some(p) => info!("Test pattern enabled: {p}"),
        None => info!("Test mode disabled"),
    }
    Ok(())
}
