//! stance-ctl: control-surface shell for the balance controller
//!
//! Exercises the full controller lifecycle against mock hardware: scripted
//! attitude scenarios feed the balance loop, a recording actuator stands in
//! for the motor bus, and telemetry can be streamed as JSON lines for
//! offline inspection.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::f64::consts::PI;
use std::time::{Duration, Instant};

use stance_core::hardware::leg_idx::NUM_LEGS;
use stance_core::hardware::{MockActuator, ScriptedImu, LEG_NAMES};
use stance_core::{
    Accumulation, AttitudeSample, BalanceConfig, GaitBlendConfig, Result, StanceConfig,
    StanceController, StaticGait, Strategy, ThresholdConfig, Tunables,
};

#[derive(Parser)]
#[clap(version = stance_core::VERSION, about = "Balance controller shell (mock hardware)")]
struct Opts {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the balance loop against a scripted attitude scenario
    Run(RunArgs),
    /// Command a manual stance and read back torques
    Position(PositionArgs),
    /// Drive the gait blend with fixed height targets
    Gait(GaitArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum Scenario {
    /// Level and motionless
    Level,
    /// Constant pitch tilt
    Tilt,
    /// Slow pitch and roll oscillation
    Wobble,
}

#[derive(Args)]
struct RunArgs {
    /// Attitude scenario fed to the loop
    #[clap(long, value_enum, default_value_t = Scenario::Level)]
    scenario: Scenario,
    /// Pitch angle for the tilt scenario (degrees)
    #[clap(long, default_value_t = 5.0)]
    pitch: f64,
    /// How long to balance (milliseconds)
    #[clap(long, default_value_t = 2000)]
    duration_ms: u64,
    /// Balance tick interval (microseconds)
    #[clap(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    tick_us: u64,
    /// Use the threshold strategy instead of PID
    #[clap(long)]
    threshold: bool,
    /// Zero the offsets before every update instead of accumulating
    #[clap(long)]
    reset_each_update: bool,
    /// Base wheel velocity
    #[clap(long, default_value_t = 1.0)]
    wheel_velocity: f64,
    /// Base stance position
    #[clap(long, default_value_t = 0.85)]
    base_position: f64,
    /// Print telemetry snapshots as JSON lines
    #[clap(long)]
    json: bool,
}

#[derive(Args)]
struct PositionArgs {
    /// Per-leg position magnitudes, FL FR RL RR
    #[clap(long, num_args = 4, default_values_t = [0.85, 0.85, 0.85, 0.85])]
    positions: Vec<f64>,
    /// Velocity scale for the move
    #[clap(long, default_value_t = 0.5)]
    velocity: f64,
}

#[derive(Args)]
struct GaitArgs {
    /// Fixed height targets for the static generator, FL FR RL RR
    #[clap(long, num_args = 4, default_values_t = [0.0, 0.0, 0.0, 0.0])]
    heights: Vec<f64>,
    /// How long to drive the gait (milliseconds)
    #[clap(long, default_value_t = 2000)]
    duration_ms: u64,
    /// Feed the wobble scenario instead of a still body
    #[clap(long)]
    wobble: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let result = match opts.command {
        Command::Run(args) => cmd_run(args),
        Command::Position(args) => cmd_position(args),
        Command::Gait(args) => cmd_gait(args),
    };
    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

/// Mock attitude source for a scenario, sized to outlast the run
fn scripted(scenario: Scenario, pitch: f64, duration: Duration, tick: Duration) -> ScriptedImu {
    match scenario {
        Scenario::Level => ScriptedImu::level(),
        Scenario::Tilt => ScriptedImu::constant(AttitudeSample::from_angles(0.0, pitch, 0.0)),
        Scenario::Wobble => ScriptedImu::sequence(wobble_script(duration, tick)),
    }
}

/// Slow pitch/roll oscillation with matching gyro rates
fn wobble_script(duration: Duration, tick: Duration) -> Vec<AttitudeSample> {
    let dt = tick.as_secs_f64();
    let ticks = (duration.as_secs_f64() / dt).ceil() as usize + 16;
    let (pitch_amp, pitch_hz) = (4.0, 0.5);
    let (roll_amp, roll_hz) = (2.0, 0.3);

    (0..ticks)
        .map(|i| {
            let t = i as f64 * dt;
            let pitch = pitch_amp * (2.0 * PI * pitch_hz * t).sin();
            let roll = roll_amp * (2.0 * PI * roll_hz * t).sin();
            let pitch_rate = pitch_amp * 2.0 * PI * pitch_hz * (2.0 * PI * pitch_hz * t).cos();
            let roll_rate = roll_amp * 2.0 * PI * roll_hz * (2.0 * PI * roll_hz * t).cos();
            AttitudeSample::from_angles(roll, pitch, 0.0).with_gyro(roll_rate, pitch_rate, 0.0)
        })
        .collect()
}

/// Controller wired to a recording actuator and the given attitude source
fn rigged(config: StanceConfig, imu: ScriptedImu) -> Result<(StanceController, MockActuator)> {
    let controller = StanceController::new(config)?;

    let actuator = MockActuator::new();
    let mock = actuator.clone();
    controller.attach_actuator(move || Ok(Box::new(mock.clone())));
    controller.attach_sensor(move || Ok(Box::new(imu.clone())));

    Ok((controller, actuator))
}

fn print_stance(actuator: &MockActuator) {
    for leg in 0..NUM_LEGS {
        println!(
            "  {}: {:+.3}",
            LEG_NAMES[leg],
            actuator.last_position(leg).unwrap_or(0.0)
        );
    }
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let duration = Duration::from_millis(args.duration_ms);
    let tick = Duration::from_micros(args.tick_us);

    let strategy = if args.threshold {
        Strategy::Threshold(ThresholdConfig::default())
    } else {
        Strategy::default()
    };
    let accumulation = if args.reset_each_update {
        Accumulation::ResetEachUpdate
    } else {
        Accumulation::Persistent
    };
    let balance = BalanceConfig::default()
        .with_tick_interval(tick)
        .with_strategy(strategy)
        .with_accumulation(accumulation);
    let tunables = Tunables {
        wheel_velocity: args.wheel_velocity,
        base_position: args.base_position,
        ..Tunables::default()
    };
    let config = StanceConfig::default()
        .with_balance(balance)
        .with_tunables(tunables)
        .with_attach_retry(1, Duration::ZERO);

    let imu = scripted(args.scenario, args.pitch, duration, tick);
    let (controller, actuator) = rigged(config, imu)?;

    controller.enable_all()?;
    controller.start_balance()?;
    tracing::info!("balancing for {:?}", duration);

    let telemetry = controller.telemetry();
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        match telemetry.recv_timeout(Duration::from_millis(20)) {
            Ok(Some(snap)) => {
                if args.json {
                    if let Ok(line) = serde_json::to_string(&snap) {
                        println!("{}", line);
                    }
                }
            }
            Ok(None) => {}
            Err(_) => break,
        }
    }

    controller.stop_balance();
    if !controller.wait_idle(Duration::from_secs(1)) {
        tracing::warn!("loop still winding down at exit");
    }
    if args.json {
        for snap in telemetry.drain() {
            if let Ok(line) = serde_json::to_string(&snap) {
                println!("{}", line);
            }
        }
    }

    let stats = controller.stats();
    println!("=== Balance run complete ===");
    println!("ticks:       {}", stats.ticks);
    println!("avg dt:      {:.3} ms", stats.avg_dt() * 1e3);
    println!("max dt:      {:.3} ms", stats.max_dt * 1e3);
    println!("io failures: {}", stats.io_failures);
    println!("offsets:     {:?}", controller.offsets().as_array());
    println!("stance:");
    print_stance(&actuator);

    controller.shutdown();
    Ok(())
}

fn cmd_position(args: PositionArgs) -> Result<()> {
    let positions: [f64; NUM_LEGS] = args
        .positions
        .try_into()
        .map_err(|_| stance_core::Error::Config("expected 4 leg positions".into()))?;

    let config = StanceConfig::default().with_attach_retry(1, Duration::ZERO);
    let (controller, actuator) = rigged(config, ScriptedImu::level())?;
    // Give the torque readout something to report
    actuator.set_torques([Some(0.12), Some(0.11), Some(0.13), Some(0.12)]);

    controller.enable_all()?;
    controller.set_leg_positions(positions, args.velocity)?;

    println!("=== Stance commanded ===");
    print_stance(&actuator);
    println!("torques:");
    for (leg, torque) in controller.leg_torques().iter().enumerate() {
        match torque {
            Some(t) => println!("  {}: {:+.3} Nm", LEG_NAMES[leg], t),
            None => println!("  {}: unavailable", LEG_NAMES[leg]),
        }
    }

    controller.disable_all()?;
    controller.shutdown();
    Ok(())
}

fn cmd_gait(args: GaitArgs) -> Result<()> {
    let heights: [f64; NUM_LEGS] = args
        .heights
        .try_into()
        .map_err(|_| stance_core::Error::Config("expected 4 leg heights".into()))?;
    let duration = Duration::from_millis(args.duration_ms);

    let gait_config = GaitBlendConfig::default();
    let imu = if args.wobble {
        ScriptedImu::sequence(wobble_script(duration, gait_config.tick_interval))
    } else {
        ScriptedImu::level()
    };
    let config = StanceConfig::default().with_attach_retry(1, Duration::ZERO);
    let (controller, actuator) = rigged(config, imu)?;

    controller.enable_all()?;
    tracing::info!("gait drive for {:?}", duration);
    controller.run_gait(StaticGait::new(heights), gait_config, duration)?;

    println!("=== Gait drive complete ===");
    println!("stance:");
    print_stance(&actuator);

    controller.shutdown();
    Ok(())
}
