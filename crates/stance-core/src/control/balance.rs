//! The fixed-period balance loop
//!
//! A dedicated worker thread that, every tick, reads one attitude sample,
//! runs the offset distributor, and pushes leg and wheel commands to the
//! actuator. Missing hardware degrades the tick instead of failing it: a
//! disconnected sensor reads level, a disconnected actuator turns the tick
//! into a dry run. An I/O error from attached hardware is fatal to the
//! loop only; the loop logs it and winds down to idle.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::comm::Sender;
use crate::control::{Accumulation, OffsetDistributor, OffsetVector, Strategy};
use crate::hardware::leg_idx::NUM_LEGS;
use crate::hardware::{limits, AttitudeSample, SharedActuator, SharedSensor, LEG_SIGNS};
use crate::{Error, Result};

/// Smallest accepted time step; substituted when the clock reads zero or
/// runs backwards so rate terms stay finite
const MIN_DT: f64 = 1e-6;

/// Lifecycle state of the balance loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    /// No worker thread active; the initial and terminal state
    Idle = 0,
    /// Worker thread ticking
    Running = 1,
    /// Stop requested; the in-flight tick finishes, then the worker exits
    Stopping = 2,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LoopState::Running,
            2 => LoopState::Stopping,
            _ => LoopState::Idle,
        }
    }
}

/// Shared, atomically updated loop state
///
/// start/stop transitions go through compare-and-swap, so two racing
/// start calls can never both spawn a worker.
#[derive(Debug, Clone, Default)]
pub struct LoopStateCell(Arc<AtomicU8>);

impl LoopStateCell {
    /// Current state
    pub fn get(&self) -> LoopState {
        LoopState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Whether a worker is active (running or winding down)
    pub fn is_active(&self) -> bool {
        self.get() != LoopState::Idle
    }

    /// Idle -> Running; false if a worker is already active
    pub(crate) fn try_begin(&self) -> bool {
        self.0
            .compare_exchange(
                LoopState::Idle as u8,
                LoopState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Running -> Stopping; false if the loop was not running
    pub(crate) fn request_stop(&self) -> bool {
        self.0
            .compare_exchange(
                LoopState::Running as u8,
                LoopState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Worker exit path: whatever the state, the loop is now idle
    pub(crate) fn finish(&self) {
        self.0.store(LoopState::Idle as u8, Ordering::Release);
    }
}

/// Runtime-adjustable drive parameters, snapshotted by the loop each tick
///
/// Setters on [`crate::controller::StanceController`] clamp these to the
/// ranges in [`crate::hardware::limits`] before they land here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tunables {
    /// Base wheel velocity command
    pub wheel_velocity: f64,
    /// Differential velocity between the wheel diagonals
    pub wheel_offset_velocity: f64,
    /// Stance position legs extend to with zero offset
    pub base_position: f64,
    /// Ceiling on the velocity scale used for leg moves
    pub max_velocity: f64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            wheel_velocity: 1.0,
            wheel_offset_velocity: 0.5,
            base_position: 0.85,
            max_velocity: 1.0,
        }
    }
}

impl Tunables {
    /// Velocity scale for leg position moves
    pub fn velocity_scale(&self) -> f64 {
        self.wheel_velocity.min(self.max_velocity).clamp(
            limits::velocity_scale::MIN,
            limits::velocity_scale::MAX,
        )
    }
}

/// Configuration for the balance loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceConfig {
    /// Fixed sleep between ticks
    pub tick_interval: Duration,
    /// Correction strategy handed to the offset distributor
    pub strategy: Strategy,
    /// Offset accumulation mode
    pub accumulation: Accumulation,
    /// Telemetry channel capacity; snapshots are dropped when full
    pub telemetry_capacity: usize,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1),
            strategy: Strategy::default(),
            accumulation: Accumulation::default(),
            telemetry_capacity: 256,
        }
    }
}

impl BalanceConfig {
    /// Set the tick interval
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the correction strategy
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the accumulation mode
    pub fn with_accumulation(mut self, accumulation: Accumulation) -> Self {
        self.accumulation = accumulation;
        self
    }
}

/// Counters and timing for a loop run
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopStats {
    /// Completed ticks across all runs
    pub ticks: u64,
    /// Hardware I/O failures that ended a run
    pub io_failures: u64,
    /// Time step of the most recent tick (seconds)
    pub last_dt: f64,
    /// Largest time step seen (seconds)
    pub max_dt: f64,
    /// Sum of all time steps (seconds)
    pub total_time: f64,
}

impl LoopStats {
    pub(crate) fn record(&mut self, dt: f64) {
        self.ticks += 1;
        self.last_dt = dt;
        self.max_dt = self.max_dt.max(dt);
        self.total_time += dt;
    }

    /// Mean time step across all recorded ticks
    pub fn avg_dt(&self) -> f64 {
        if self.ticks == 0 {
            0.0
        } else {
            self.total_time / self.ticks as f64
        }
    }
}

/// Snapshot of one balance tick, published on the telemetry channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TickTelemetry {
    /// Tick counter within the current run
    pub tick: u64,
    /// Time step used for this tick (seconds)
    pub dt: f64,
    /// The attitude sample driving this tick
    pub attitude: AttitudeSample,
    /// Offsets after this tick's distribution
    pub offsets: OffsetVector,
    /// Whether commands reached the actuator (false on a dry run)
    pub dispatched: bool,
}

/// Everything the worker thread shares with the controller
pub(crate) struct LoopContext {
    pub distributor: Arc<Mutex<OffsetDistributor>>,
    pub tunables: Arc<Mutex<Tunables>>,
    pub sensor: SharedSensor,
    pub actuator: SharedActuator,
}

/// Handle to a spawned balance worker
pub(crate) struct BalanceHandle {
    thread: Option<JoinHandle<()>>,
}

impl BalanceHandle {
    /// Whether the worker thread has exited
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the worker to exit, polling up to `timeout`
    ///
    /// Returns false on timeout, in which case the thread is detached
    /// rather than blocked on.
    pub fn join_timeout(mut self, timeout: Duration) -> bool {
        let Some(handle) = self.thread.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        let _ = handle.join();
        true
    }
}

/// The balance worker
pub(crate) struct BalanceLoop;

impl BalanceLoop {
    /// Spawn the worker thread
    ///
    /// The caller must already have moved the state cell to Running; the
    /// worker runs until the state leaves Running or a hardware error
    /// ends the run, then stores Idle.
    pub fn spawn(
        config: BalanceConfig,
        ctx: LoopContext,
        state: LoopStateCell,
        stats: Arc<Mutex<LoopStats>>,
        telemetry: Sender<TickTelemetry>,
    ) -> Result<BalanceHandle> {
        let thread = thread::Builder::new()
            .name("stance-balance".into())
            .spawn(move || {
                Self::run(config, ctx, &state, &stats, &telemetry);
                state.finish();
            })
            .map_err(|e| Error::ControlLoop(format!("failed to spawn balance worker: {}", e)))?;

        Ok(BalanceHandle {
            thread: Some(thread),
        })
    }

    fn run(
        config: BalanceConfig,
        ctx: LoopContext,
        state: &LoopStateCell,
        stats: &Arc<Mutex<LoopStats>>,
        telemetry: &Sender<TickTelemetry>,
    ) {
        tracing::info!("balance loop running");
        let mut tick = 0u64;
        let mut last = Instant::now();

        while state.get() == LoopState::Running {
            let tick_start = Instant::now();
            let mut dt = tick_start.duration_since(last).as_secs_f64();
            last = tick_start;
            if dt <= 0.0 {
                dt = MIN_DT;
            }

            // One attitude sample; a missing sensor reads level
            let attitude = {
                let mut sensor = ctx.sensor.lock();
                match sensor.as_mut() {
                    Some(s) => match s.sample() {
                        Ok(sample) => sample,
                        Err(e) => {
                            tracing::error!("attitude read failed, stopping loop: {}", e);
                            stats.lock().io_failures += 1;
                            break;
                        }
                    },
                    None => AttitudeSample::LEVEL,
                }
            };

            let offsets = ctx
                .distributor
                .lock()
                .update(attitude.pitch(), attitude.roll(), dt);
            let tunables = *ctx.tunables.lock();

            let dispatched = {
                let mut actuator = ctx.actuator.lock();
                match actuator.as_mut() {
                    Some(a) => {
                        if let Err(e) = Self::dispatch(a.as_mut(), &offsets, &tunables) {
                            tracing::error!("command dispatch failed, stopping loop: {}", e);
                            stats.lock().io_failures += 1;
                            break;
                        }
                        true
                    }
                    None => {
                        tracing::debug!(offsets = ?offsets.as_array(), "dry run, no actuator");
                        false
                    }
                }
            };

            stats.lock().record(dt);
            let _ = telemetry.try_send(TickTelemetry {
                tick,
                dt,
                attitude,
                offsets,
                dispatched,
            });
            tick += 1;

            thread::sleep(config.tick_interval);
        }

        tracing::info!(ticks = tick, "balance loop stopped");
    }

    /// Push this tick's leg and wheel commands to the actuator
    fn dispatch(
        actuator: &mut dyn crate::hardware::LegActuator,
        offsets: &OffsetVector,
        tunables: &Tunables,
    ) -> Result<()> {
        let scale = tunables.velocity_scale();
        for leg in 0..NUM_LEGS {
            let magnitude = (tunables.base_position - offsets.get(leg))
                .clamp(limits::leg_travel::MIN, limits::leg_travel::MAX);
            actuator.set_leg_position(leg, LEG_SIGNS[leg] * magnitude, scale)?;
        }

        let wheels = crate::hardware::wheel_mix(
            tunables.wheel_velocity,
            tunables.wheel_offset_velocity,
        );
        for leg in 0..NUM_LEGS {
            actuator.set_wheel_velocity(leg, wheels[leg])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::bounded_channel;
    use crate::hardware::{leg_idx, AttitudeSensor, Connection, MockActuator, ScriptedImu};
    use approx::assert_relative_eq;

    fn context(
        actuator: Connection<Box<dyn crate::hardware::LegActuator>>,
        sensor: Connection<Box<dyn AttitudeSensor>>,
    ) -> LoopContext {
        LoopContext {
            distributor: Arc::new(Mutex::new(OffsetDistributor::default())),
            tunables: Arc::new(Mutex::new(Tunables::default())),
            sensor: Arc::new(Mutex::new(sensor)),
            actuator: Arc::new(Mutex::new(actuator)),
        }
    }

    fn started(mut imu: ScriptedImu) -> Connection<Box<dyn AttitudeSensor>> {
        imu.start().unwrap();
        Connection::Connected(Box::new(imu))
    }

    #[test]
    fn test_state_cell_transitions() {
        let cell = LoopStateCell::default();
        assert_eq!(cell.get(), LoopState::Idle);

        assert!(cell.try_begin());
        assert_eq!(cell.get(), LoopState::Running);
        // Second begin refused while active
        assert!(!cell.try_begin());

        assert!(cell.request_stop());
        assert_eq!(cell.get(), LoopState::Stopping);
        assert!(!cell.request_stop());

        cell.finish();
        assert_eq!(cell.get(), LoopState::Idle);
        assert!(cell.try_begin());
    }

    #[test]
    fn test_dispatch_level_holds_base_stance() {
        let mock = MockActuator::new();
        let mut boxed: Box<dyn crate::hardware::LegActuator> = Box::new(mock.clone());
        let offsets = OffsetVector::ZERO;
        let tunables = Tunables::default();

        BalanceLoop::dispatch(boxed.as_mut(), &offsets, &tunables).unwrap();

        for leg in 0..NUM_LEGS {
            let expected = LEG_SIGNS[leg] * 0.85;
            assert_relative_eq!(mock.last_position(leg).unwrap(), expected);
        }
    }

    #[test]
    fn test_dispatch_applies_offsets_and_travel_clamp() {
        let mock = MockActuator::new();
        let mut boxed: Box<dyn crate::hardware::LegActuator> = Box::new(mock.clone());
        // A front correction produced by the distributor path
        let mut dist = OffsetDistributor::default();
        let offsets = dist.update(5.0, 0.0, 0.001);

        let mut tunables = Tunables::default();
        tunables.base_position = 0.2;

        BalanceLoop::dispatch(boxed.as_mut(), &offsets, &tunables).unwrap();

        let fl = mock.last_position(leg_idx::FRONT_LEFT).unwrap();
        // base 0.2 minus a positive front offset, floored at zero travel,
        // negated by the mounting sign
        assert!(fl <= 0.0);
        assert!(fl >= -0.2);
        let rl = mock.last_position(leg_idx::REAR_LEFT).unwrap();
        assert_relative_eq!(rl, 0.2);
    }

    #[test]
    fn test_loop_runs_and_stops() {
        let mock = MockActuator::new();
        let ctx = context(
            Connection::Connected(Box::new(mock.clone())),
            started(ScriptedImu::level()),
        );
        let state = LoopStateCell::default();
        let stats = Arc::new(Mutex::new(LoopStats::default()));
        let (tx, rx) = bounded_channel(64);

        assert!(state.try_begin());
        let config = BalanceConfig::default().with_tick_interval(Duration::from_micros(200));
        let handle =
            BalanceLoop::spawn(config, ctx, state.clone(), stats.clone(), tx).unwrap();

        thread::sleep(Duration::from_millis(30));
        assert_eq!(state.get(), LoopState::Running);

        state.request_stop();
        assert!(handle.join_timeout(Duration::from_secs(1)));
        assert_eq!(state.get(), LoopState::Idle);

        let stats = *stats.lock();
        assert!(stats.ticks > 0);
        assert_eq!(stats.io_failures, 0);
        assert!(mock.op_count() > 0);

        // Every published snapshot was a live dispatch with legal offsets
        for snap in rx.drain() {
            assert!(snap.dispatched);
            assert!(snap.offsets.max() <= OffsetVector::MAX);
            assert_relative_eq!(snap.offsets.min(), 0.0);
        }
    }

    #[test]
    fn test_loop_dry_runs_without_hardware() {
        let ctx = context(Connection::Disconnected, Connection::Disconnected);
        let state = LoopStateCell::default();
        let stats = Arc::new(Mutex::new(LoopStats::default()));
        let (tx, rx) = bounded_channel(64);

        assert!(state.try_begin());
        let config = BalanceConfig::default().with_tick_interval(Duration::from_micros(200));
        let handle =
            BalanceLoop::spawn(config, ctx, state.clone(), stats.clone(), tx).unwrap();

        thread::sleep(Duration::from_millis(20));
        state.request_stop();
        assert!(handle.join_timeout(Duration::from_secs(1)));

        assert!(stats.lock().ticks > 0);
        let snaps = rx.drain();
        assert!(!snaps.is_empty());
        for snap in snaps {
            assert!(!snap.dispatched);
            assert_eq!(snap.offsets.as_array(), [0.0; 4]);
        }
    }

    #[test]
    fn test_sensor_failure_ends_run() {
        let mock = MockActuator::new();
        let ctx = context(
            Connection::Connected(Box::new(mock)),
            started(ScriptedImu::level().with_fail_after(5)),
        );
        let state = LoopStateCell::default();
        let stats = Arc::new(Mutex::new(LoopStats::default()));
        let (tx, _rx) = bounded_channel(64);

        assert!(state.try_begin());
        let config = BalanceConfig::default().with_tick_interval(Duration::from_micros(200));
        let handle =
            BalanceLoop::spawn(config, ctx, state.clone(), stats.clone(), tx).unwrap();

        assert!(handle.join_timeout(Duration::from_secs(1)));
        assert_eq!(state.get(), LoopState::Idle);
        let stats = *stats.lock();
        assert_eq!(stats.ticks, 5);
        assert_eq!(stats.io_failures, 1);
    }

    #[test]
    fn test_actuator_failure_ends_run() {
        let mock = MockActuator::new();
        mock.set_fail_commands(true);
        let ctx = context(
            Connection::Connected(Box::new(mock.clone())),
            started(ScriptedImu::level()),
        );
        let state = LoopStateCell::default();
        let stats = Arc::new(Mutex::new(LoopStats::default()));
        let (tx, _rx) = bounded_channel(64);

        assert!(state.try_begin());
        let handle = BalanceLoop::spawn(
            BalanceConfig::default(),
            ctx,
            state.clone(),
            stats.clone(),
            tx,
        )
        .unwrap();

        assert!(handle.join_timeout(Duration::from_secs(1)));
        assert_eq!(state.get(), LoopState::Idle);
        assert_eq!(stats.lock().io_failures, 1);
        assert_eq!(stats.lock().ticks, 0);
    }

    #[test]
    fn test_telemetry_drop_on_full_keeps_loop_alive() {
        let ctx = context(Connection::Disconnected, started(ScriptedImu::level()));
        let state = LoopStateCell::default();
        let stats = Arc::new(Mutex::new(LoopStats::default()));
        // Tiny channel that nobody drains
        let (tx, rx) = bounded_channel(2);

        assert!(state.try_begin());
        let config = BalanceConfig::default().with_tick_interval(Duration::from_micros(100));
        let handle =
            BalanceLoop::spawn(config, ctx, state.clone(), stats.clone(), tx).unwrap();

        thread::sleep(Duration::from_millis(20));
        state.request_stop();
        assert!(handle.join_timeout(Duration::from_secs(1)));

        // Far more ticks than channel slots: overflow was dropped, not fatal
        assert!(stats.lock().ticks > 2);
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn test_tunables_velocity_scale() {
        let mut t = Tunables::default();
        assert_relative_eq!(t.velocity_scale(), 1.0);

        t.wheel_velocity = 0.3;
        assert_relative_eq!(t.velocity_scale(), 0.3);

        // Ceiling binds
        t.wheel_velocity = 0.9;
        t.max_velocity = 0.5;
        assert_relative_eq!(t.velocity_scale(), 0.5);

        // Floor guards a near-zero command
        t.wheel_velocity = 0.0;
        assert_relative_eq!(t.velocity_scale(), limits::velocity_scale::MIN);
    }

    #[test]
    fn test_stats_record() {
        let mut stats = LoopStats::default();
        stats.record(0.001);
        stats.record(0.003);
        assert_eq!(stats.ticks, 2);
        assert_relative_eq!(stats.last_dt, 0.003);
        assert_relative_eq!(stats.max_dt, 0.003);
        assert_relative_eq!(stats.avg_dt(), 0.002);
    }
}
