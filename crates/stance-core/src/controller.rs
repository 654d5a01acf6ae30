//! Stance controller: hardware attachment and loop lifecycle
//!
//! [`StanceController`] owns the actuator and sensor connections, the
//! shared tunables, and the balance worker. All control-surface calls go
//! through it; the worker thread only ever sees the shared handles.
//!
//! # Example
//! ```ignore
//! use stance_core::{StanceConfig, StanceController};
//! use stance_core::hardware::{MockActuator, ScriptedImu};
//!
//! let controller = StanceController::new(StanceConfig::default())?;
//! controller.attach_actuator(|| Ok(Box::new(MockActuator::new())));
//! controller.attach_sensor(|| Ok(Box::new(ScriptedImu::level())));
//! controller.enable_all()?;
//! controller.start_balance()?;
//! // ... later
//! controller.shutdown();
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::comm::{bounded_channel, Receiver, Sender};
use crate::control::{
    BalanceConfig, BalanceHandle, BalanceLoop, GaitBlendConfig, GaitDrive, GaitGenerator,
    LoopContext, LoopState, LoopStateCell, LoopStats, OffsetDistributor, OffsetVector,
    PidConfig, TickTelemetry, Tunables,
};
use crate::hardware::leg_idx::NUM_LEGS;
use crate::hardware::{
    limits, AttitudeSample, AttitudeSensor, Connection, LegActuator, SharedActuator, SharedSensor,
    LEG_NAMES, LEG_SIGNS,
};
use crate::{Error, Result};

/// Top-level controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StanceConfig {
    /// Balance loop settings
    pub balance: BalanceConfig,
    /// Initial drive parameters
    pub tunables: Tunables,
    /// Connection attempts per hardware device
    pub attach_attempts: u32,
    /// Delay between connection attempts
    pub attach_retry_delay: Duration,
    /// How long shutdown waits for the worker before detaching it
    pub shutdown_timeout: Duration,
}

impl Default for StanceConfig {
    fn default() -> Self {
        Self {
            balance: BalanceConfig::default(),
            tunables: Tunables::default(),
            attach_attempts: 3,
            attach_retry_delay: Duration::from_secs(1),
            shutdown_timeout: Duration::from_millis(500),
        }
    }
}

impl StanceConfig {
    /// Set the balance loop settings
    pub fn with_balance(mut self, balance: BalanceConfig) -> Self {
        self.balance = balance;
        self
    }

    /// Set the initial drive parameters
    pub fn with_tunables(mut self, tunables: Tunables) -> Self {
        self.tunables = tunables;
        self
    }

    /// Set the attach retry policy
    pub fn with_attach_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.attach_attempts = attempts;
        self.attach_retry_delay = delay;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.balance.tick_interval.is_zero() {
            return Err(Error::Config("tick interval must be non-zero".into()));
        }
        if self.balance.telemetry_capacity == 0 {
            return Err(Error::Config("telemetry capacity must be at least 1".into()));
        }
        if self.attach_attempts == 0 {
            return Err(Error::Config("attach attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Clamp a control-surface parameter into its legal range, logging when
/// the caller's value was out of range
fn clamp_logged(name: &str, value: f64, min: f64, max: f64) -> f64 {
    let clamped = value.clamp(min, max);
    if clamped != value {
        tracing::warn!(
            "{} {} out of range [{}, {}], clamped to {}",
            name,
            value,
            min,
            max,
            clamped
        );
    }
    clamped
}

/// Owns the hardware connections and the balance loop lifecycle
///
/// Either hardware side may be absent: attach failures resolve to a
/// disconnected state and every operation on a disconnected device is a
/// logged no-op, so the control flow reads the same with or without a
/// robot on the bench.
pub struct StanceController {
    config: StanceConfig,
    tunables: Arc<Mutex<Tunables>>,
    distributor: Arc<Mutex<OffsetDistributor>>,
    actuator: SharedActuator,
    sensor: SharedSensor,
    loop_state: LoopStateCell,
    stats: Arc<Mutex<LoopStats>>,
    worker: Mutex<Option<BalanceHandle>>,
    telemetry_tx: Sender<TickTelemetry>,
    telemetry_rx: Receiver<TickTelemetry>,
}

impl StanceController {
    /// Create a controller with no hardware attached
    pub fn new(config: StanceConfig) -> Result<Self> {
        config.validate()?;

        let distributor = OffsetDistributor::new(
            config.balance.strategy,
            config.balance.accumulation,
        );
        let tunables = Tunables {
            wheel_velocity: clamp_logged(
                "wheel velocity",
                config.tunables.wheel_velocity,
                limits::wheel_velocity::MIN,
                limits::wheel_velocity::MAX,
            ),
            wheel_offset_velocity: clamp_logged(
                "wheel offset velocity",
                config.tunables.wheel_offset_velocity,
                limits::wheel_velocity::MIN,
                limits::wheel_velocity::MAX,
            ),
            base_position: clamp_logged(
                "base position",
                config.tunables.base_position,
                limits::base_position::MIN,
                limits::base_position::MAX,
            ),
            max_velocity: clamp_logged(
                "max velocity",
                config.tunables.max_velocity,
                limits::max_velocity::MIN,
                limits::max_velocity::MAX,
            ),
        };
        let (telemetry_tx, telemetry_rx) = bounded_channel(config.balance.telemetry_capacity);

        Ok(Self {
            config,
            tunables: Arc::new(Mutex::new(tunables)),
            distributor: Arc::new(Mutex::new(distributor)),
            actuator: Arc::new(Mutex::new(Connection::Disconnected)),
            sensor: Arc::new(Mutex::new(Connection::Disconnected)),
            loop_state: LoopStateCell::default(),
            stats: Arc::new(Mutex::new(LoopStats::default())),
            worker: Mutex::new(None),
            telemetry_tx,
            telemetry_rx,
        })
    }

    /// Attach the leg actuator, retrying per the configured policy
    ///
    /// Returns false when every attempt failed; the controller then runs
    /// without an actuator and command operations become no-ops.
    pub fn attach_actuator<F>(&self, mut connect: F) -> bool
    where
        F: FnMut() -> Result<Box<dyn LegActuator>>,
    {
        for attempt in 1..=self.config.attach_attempts {
            match connect() {
                Ok(actuator) => {
                    *self.actuator.lock() = Connection::Connected(actuator);
                    tracing::info!(attempt, "leg actuator attached");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(attempt, "actuator attach failed: {}", e);
                    if attempt < self.config.attach_attempts {
                        thread::sleep(self.config.attach_retry_delay);
                    }
                }
            }
        }
        tracing::warn!("running without a leg actuator");
        false
    }

    /// Attach and start the attitude sensor, retrying per the configured
    /// policy
    ///
    /// A sensor that connects but fails to start counts as a failed
    /// attempt. Returns false when every attempt failed; the balance loop
    /// then reads level attitude.
    pub fn attach_sensor<F>(&self, mut connect: F) -> bool
    where
        F: FnMut() -> Result<Box<dyn AttitudeSensor>>,
    {
        for attempt in 1..=self.config.attach_attempts {
            let started = connect().and_then(|mut sensor| {
                sensor.start()?;
                Ok(sensor)
            });
            match started {
                Ok(sensor) => {
                    *self.sensor.lock() = Connection::Connected(sensor);
                    tracing::info!(attempt, "attitude sensor attached");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(attempt, "sensor attach failed: {}", e);
                    if attempt < self.config.attach_attempts {
                        thread::sleep(self.config.attach_retry_delay);
                    }
                }
            }
        }
        tracing::warn!("running without an attitude sensor");
        false
    }

    pub fn is_actuator_attached(&self) -> bool {
        self.actuator.lock().is_connected()
    }

    pub fn is_sensor_attached(&self) -> bool {
        self.sensor.lock().is_connected()
    }

    /// Enable torque on all legs
    pub fn enable_all(&self) -> Result<()> {
        match self.actuator.lock().as_mut() {
            Some(actuator) => actuator.enable(),
            None => {
                tracing::warn!("enable ignored, no actuator attached");
                Ok(())
            }
        }
    }

    /// Disable torque on all legs
    pub fn disable_all(&self) -> Result<()> {
        match self.actuator.lock().as_mut() {
            Some(actuator) => actuator.disable(),
            None => {
                tracing::warn!("disable ignored, no actuator attached");
                Ok(())
            }
        }
    }

    /// Command each leg to a position magnitude
    ///
    /// Magnitudes are clamped to the leg travel range and the mounting
    /// sign is applied at dispatch, so callers reason in unsigned travel.
    pub fn set_leg_positions(
        &self,
        positions: [f64; NUM_LEGS],
        velocity_scale: f64,
    ) -> Result<()> {
        let scale = clamp_logged(
            "velocity scale",
            velocity_scale,
            limits::velocity_scale::MIN,
            limits::velocity_scale::MAX,
        );
        match self.actuator.lock().as_mut() {
            Some(actuator) => {
                for leg in 0..NUM_LEGS {
                    let magnitude = clamp_logged(
                        LEG_NAMES[leg],
                        positions[leg],
                        limits::leg_travel::MIN,
                        limits::leg_travel::MAX,
                    );
                    actuator.set_leg_position(leg, LEG_SIGNS[leg] * magnitude, scale)?;
                }
                Ok(())
            }
            None => {
                tracing::warn!("leg positions ignored, no actuator attached");
                Ok(())
            }
        }
    }

    /// Read the present torque of every leg
    ///
    /// Empty when no actuator is attached. A per-leg read failure turns
    /// into a hole rather than an error so one flaky encoder does not
    /// mask the rest.
    pub fn leg_torques(&self) -> Vec<Option<f64>> {
        match self.actuator.lock().as_mut() {
            Some(actuator) => (0..NUM_LEGS)
                .map(|leg| match actuator.read_torque(leg) {
                    Ok(torque) => torque,
                    Err(e) => {
                        tracing::debug!("torque read failed for {}: {}", LEG_NAMES[leg], e);
                        None
                    }
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Replace the per-axis attitude PID parameters, preserving controller
    /// state
    pub fn set_pid(&self, pitch: PidConfig, roll: PidConfig) {
        self.distributor.lock().set_gains(pitch, roll);
        tracing::info!(?pitch, ?roll, "PID parameters updated");
    }

    /// Zero the PID integrators and error history
    pub fn reset_pid_state(&self) {
        self.distributor.lock().reset_pids();
    }

    /// Set the wheel drive velocity and optionally the diagonal offset
    ///
    /// When `offset_velocity` is `None` it defaults to half the drive
    /// velocity.
    pub fn set_wheel_velocity(&self, velocity: f64, offset_velocity: Option<f64>) {
        let v = clamp_logged(
            "wheel velocity",
            velocity,
            limits::wheel_velocity::MIN,
            limits::wheel_velocity::MAX,
        );
        let ov = match offset_velocity {
            Some(ov) => clamp_logged(
                "wheel offset velocity",
                ov,
                limits::wheel_velocity::MIN,
                limits::wheel_velocity::MAX,
            ),
            None => v * 0.5,
        };
        let mut tunables = self.tunables.lock();
        tunables.wheel_velocity = v;
        tunables.wheel_offset_velocity = ov;
    }

    /// Set the base stance position and the leg velocity ceiling
    pub fn set_leg_params(&self, base_position: f64, max_velocity: f64) {
        let base = clamp_logged(
            "base position",
            base_position,
            limits::base_position::MIN,
            limits::base_position::MAX,
        );
        let max_vel = clamp_logged(
            "max velocity",
            max_velocity,
            limits::max_velocity::MIN,
            limits::max_velocity::MAX,
        );
        let mut tunables = self.tunables.lock();
        tunables.base_position = base;
        tunables.max_velocity = max_vel;
    }

    /// Snapshot of the current drive parameters
    pub fn tunables(&self) -> Tunables {
        *self.tunables.lock()
    }

    /// Snapshot of the current per-leg offsets
    pub fn offsets(&self) -> OffsetVector {
        self.distributor.lock().offsets()
    }

    /// Start the balance loop
    ///
    /// Idempotent: if a loop is already active this logs and succeeds
    /// without spawning a second worker. Offsets start from zero each
    /// run; PID state carries over so retuning mid-session does not kick
    /// the legs.
    pub fn start_balance(&self) -> Result<()> {
        if !self.loop_state.try_begin() {
            tracing::warn!("balance loop already active");
            return Ok(());
        }

        // The state was idle, so a previous worker has already wound
        // down; reap its handle before spawning the next one
        if let Some(old) = self.worker.lock().take() {
            let _ = old.join_timeout(self.config.shutdown_timeout);
        }

        self.distributor.lock().reset_offsets();

        let ctx = LoopContext {
            distributor: Arc::clone(&self.distributor),
            tunables: Arc::clone(&self.tunables),
            sensor: Arc::clone(&self.sensor),
            actuator: Arc::clone(&self.actuator),
        };
        match BalanceLoop::spawn(
            self.config.balance.clone(),
            ctx,
            self.loop_state.clone(),
            Arc::clone(&self.stats),
            self.telemetry_tx.clone(),
        ) {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.loop_state.finish();
                Err(e)
            }
        }
    }

    /// Request the balance loop to stop
    ///
    /// Returns immediately; the in-flight tick completes and the worker
    /// winds down to idle on its own. Use [`Self::wait_idle`] to block on
    /// the transition.
    pub fn stop_balance(&self) {
        if self.loop_state.request_stop() {
            tracing::info!("balance stop requested");
        }
    }

    /// Wait for the loop to reach idle, up to `timeout`
    ///
    /// Returns false if the loop was still active at the deadline.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        if let Some(worker) = self.worker.lock().take() {
            return worker.join_timeout(timeout);
        }
        let deadline = Instant::now() + timeout;
        while self.loop_state.get() != LoopState::Idle {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Current lifecycle state of the balance loop
    pub fn loop_state(&self) -> LoopState {
        self.loop_state.get()
    }

    /// Snapshot of the loop counters
    pub fn stats(&self) -> LoopStats {
        *self.stats.lock()
    }

    /// Receiver for per-tick telemetry snapshots
    pub fn telemetry(&self) -> Receiver<TickTelemetry> {
        self.telemetry_rx.clone()
    }

    /// Drive a blended gait on the caller's thread for `duration`
    ///
    /// Claims the loop lifecycle, so it refuses to run while the balance
    /// worker is active and [`Self::stop_balance`] interrupts it early.
    /// Hardware errors end the drive and propagate.
    pub fn run_gait<G: GaitGenerator>(
        &self,
        generator: G,
        config: GaitBlendConfig,
        duration: Duration,
    ) -> Result<()> {
        if !self.loop_state.try_begin() {
            return Err(Error::InvalidState(
                "balance loop is active, stop it before the gait drive".into(),
            ));
        }
        let result = self.gait_loop(generator, config, duration);
        self.loop_state.finish();
        result
    }

    fn gait_loop<G: GaitGenerator>(
        &self,
        generator: G,
        config: GaitBlendConfig,
        duration: Duration,
    ) -> Result<()> {
        let mut drive = GaitDrive::new(generator, config);
        let scale = self.tunables.lock().velocity_scale();
        let dt = config.tick_interval.as_secs_f64();

        // Hold the base stance while the pattern settles
        self.dispatch_positions(&drive.base_positions(), scale)?;
        thread::sleep(config.settle);

        tracing::info!(?duration, "gait drive running");
        let start = Instant::now();
        while start.elapsed() < duration && self.loop_state.get() == LoopState::Running {
            let sample = {
                let mut sensor = self.sensor.lock();
                match sensor.as_mut() {
                    Some(s) => s.sample()?,
                    None => AttitudeSample::LEVEL,
                }
            };

            let targets = drive.tick(sample, dt);
            self.dispatch_positions(&targets, scale)?;

            thread::sleep(config.tick_interval);
        }
        tracing::info!("gait drive finished");
        Ok(())
    }

    /// Push signed leg targets as-is; a dry run without an actuator
    fn dispatch_positions(&self, targets: &[f64; NUM_LEGS], scale: f64) -> Result<()> {
        match self.actuator.lock().as_mut() {
            Some(actuator) => {
                for leg in 0..NUM_LEGS {
                    actuator.set_leg_position(leg, targets[leg], scale)?;
                }
                Ok(())
            }
            None => {
                tracing::debug!(?targets, "gait dry run, no actuator");
                Ok(())
            }
        }
    }

    /// Stop the loop, release the hardware, and leave everything safe
    ///
    /// Idempotent; also runs on drop. A worker that misses the shutdown
    /// deadline is detached rather than blocked on, and loses its
    /// hardware when the connections are taken out from under it.
    pub fn shutdown(&self) {
        self.loop_state.request_stop();
        if let Some(worker) = self.worker.lock().take() {
            if !worker.join_timeout(self.config.shutdown_timeout) {
                tracing::warn!("balance worker missed the shutdown deadline, detaching");
            }
        }

        {
            let mut conn = self.actuator.lock();
            if let Some(actuator) = conn.as_mut() {
                if let Err(e) = actuator.disable() {
                    tracing::warn!("disable on shutdown failed: {}", e);
                }
            }
            if let Some(mut actuator) = conn.take() {
                if let Err(e) = actuator.close() {
                    tracing::warn!("actuator close failed: {}", e);
                }
                tracing::info!("leg actuator released");
            }
        }

        if let Some(mut sensor) = self.sensor.lock().take() {
            if let Err(e) = sensor.stop() {
                tracing::warn!("sensor stop failed: {}", e);
            }
            tracing::info!("attitude sensor released");
        }
    }
}

impl Drop for StanceController {
    fn drop(&mut self) {
        // Ensure we clean up even if shutdown wasn't called
        self.shutdown();
    }
}
