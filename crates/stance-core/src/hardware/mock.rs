//! Mock hardware for tests and dry-run operation
//!
//! `MockActuator` records every command it receives and can inject
//! failures; `ScriptedImu` replays a canned attitude sequence. Together
//! they let the full lifecycle run without a robot attached.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::leg_idx::NUM_LEGS;
use super::{AttitudeSample, AttitudeSensor, LegActuator};
use crate::{Error, Result};

/// One recorded actuator operation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActuatorOp {
    Enable,
    Disable,
    LegPosition {
        leg: usize,
        position: f64,
        velocity_scale: f64,
    },
    WheelVelocity {
        leg: usize,
        velocity: f64,
    },
    Close,
}

#[derive(Debug, Default)]
struct MockActuatorShared {
    log: Mutex<Vec<ActuatorOp>>,
    last_positions: Mutex<[Option<f64>; NUM_LEGS]>,
    torques: Mutex<[Option<f64>; NUM_LEGS]>,
    enabled: AtomicBool,
    closed: AtomicBool,
    fail_commands: AtomicBool,
    fail_enable: AtomicBool,
}

/// Recording leg actuator
///
/// Clones share state, so a test can keep one handle for inspection while
/// the controller owns the other.
#[derive(Debug, Clone, Default)]
pub struct MockActuator {
    shared: Arc<MockActuatorShared>,
}

impl MockActuator {
    /// Create a mock actuator with no recorded operations
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every operation received so far
    pub fn log(&self) -> Vec<ActuatorOp> {
        self.shared.log.lock().clone()
    }

    /// Number of operations received so far
    pub fn op_count(&self) -> usize {
        self.shared.log.lock().len()
    }

    /// Most recent commanded position for one leg
    pub fn last_position(&self, leg: usize) -> Option<f64> {
        self.shared.last_positions.lock()[leg]
    }

    /// Whether the motors are currently enabled
    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Relaxed)
    }

    /// Whether close() has been called
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Relaxed)
    }

    /// Make subsequent position/velocity commands fail
    pub fn set_fail_commands(&self, fail: bool) {
        self.shared.fail_commands.store(fail, Ordering::Relaxed);
    }

    /// Make subsequent enable calls fail
    pub fn set_fail_enable(&self, fail: bool) {
        self.shared.fail_enable.store(fail, Ordering::Relaxed);
    }

    /// Set the torque readings returned by read_torque
    pub fn set_torques(&self, torques: [Option<f64>; NUM_LEGS]) {
        *self.shared.torques.lock() = torques;
    }

    fn record(&self, op: ActuatorOp) {
        self.shared.log.lock().push(op);
    }
}

impl LegActuator for MockActuator {
    fn enable(&mut self) -> Result<()> {
        if self.shared.fail_enable.load(Ordering::Relaxed) {
            return Err(Error::Hardware("mock enable failure".into()));
        }
        self.record(ActuatorOp::Enable);
        self.shared.enabled.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn disable(&mut self) -> Result<()> {
        self.record(ActuatorOp::Disable);
        self.shared.enabled.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn set_leg_position(&mut self, leg: usize, position: f64, velocity_scale: f64) -> Result<()> {
        if self.shared.fail_commands.load(Ordering::Relaxed) {
            return Err(Error::Hardware("mock command failure".into()));
        }
        self.record(ActuatorOp::LegPosition {
            leg,
            position,
            velocity_scale,
        });
        self.shared.last_positions.lock()[leg] = Some(position);
        Ok(())
    }

    fn set_wheel_velocity(&mut self, leg: usize, velocity: f64) -> Result<()> {
        if self.shared.fail_commands.load(Ordering::Relaxed) {
            return Err(Error::Hardware("mock command failure".into()));
        }
        self.record(ActuatorOp::WheelVelocity { leg, velocity });
        Ok(())
    }

    fn read_torque(&mut self, leg: usize) -> Result<Option<f64>> {
        Ok(self.shared.torques.lock()[leg])
    }

    fn close(&mut self) -> Result<()> {
        self.record(ActuatorOp::Close);
        self.shared.enabled.store(false, Ordering::Relaxed);
        self.shared.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Scripted attitude source
///
/// Replays a fixed sample sequence, holding the last entry once the script
/// runs out. An empty script reads level forever.
#[derive(Debug, Clone, Default)]
pub struct ScriptedImu {
    script: Vec<AttitudeSample>,
    cursor: usize,
    served: usize,
    fail_after: Option<usize>,
    fail_start: bool,
    started: bool,
}

impl ScriptedImu {
    /// A sensor that always reads level
    pub fn level() -> Self {
        Self::default()
    }

    /// A sensor that always returns the same sample
    pub fn constant(sample: AttitudeSample) -> Self {
        Self {
            script: vec![sample],
            ..Default::default()
        }
    }

    /// A sensor that replays the given samples, then holds the last one
    pub fn sequence(script: Vec<AttitudeSample>) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    /// Fail every read after `count` successful samples
    pub fn with_fail_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Refuse to start
    pub fn with_fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }
}

impl AttitudeSensor for ScriptedImu {
    fn start(&mut self) -> Result<()> {
        if self.fail_start {
            return Err(Error::Hardware("mock sensor refused to start".into()));
        }
        self.started = true;
        Ok(())
    }

    fn sample(&mut self) -> Result<AttitudeSample> {
        if !self.started {
            return Err(Error::Hardware("mock sensor not started".into()));
        }
        if let Some(limit) = self.fail_after {
            if self.served >= limit {
                return Err(Error::Hardware("mock sensor failure".into()));
            }
        }
        self.served += 1;

        if self.script.is_empty() {
            return Ok(AttitudeSample::LEVEL);
        }
        let sample = self.script[self.cursor];
        if self.cursor + 1 < self.script.len() {
            self.cursor += 1;
        }
        Ok(sample)
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }
}
