//! PID Controller implementation
//!
//! A standard PID (Proportional-Integral-Derivative) controller with
//! integral windup protection, used per attitude axis by the offset
//! distributor.

use serde::{Deserialize, Serialize};

/// PID controller configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PidConfig {
    /// Proportional gain
    pub kp: f64,
    /// Integral gain
    pub ki: f64,
    /// Derivative gain
    pub kd: f64,
    /// Integral windup limit (magnitude of the accumulated integral)
    pub integral_limit: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            integral_limit: 1.0,
        }
    }
}

impl PidConfig {
    /// Create a new PID config with given gains
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            ..Default::default()
        }
    }

    /// Set the integral windup limit
    pub fn with_integral_limit(mut self, limit: f64) -> Self {
        self.integral_limit = limit;
        self
    }

    /// Create a P-only controller
    pub fn p(kp: f64) -> Self {
        Self::new(kp, 0.0, 0.0)
    }
}

/// PID controller internal state
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PidState {
    /// Accumulated integral term
    pub integral: f64,
    /// Previous error for derivative calculation
    pub prev_error: f64,
    /// Output of the most recent compute call
    pub last_output: f64,
}

/// PID controller
///
/// The integral is clamped to ±`integral_limit` after every update, and
/// the derivative term is suppressed when the time step is not positive,
/// so a stalled clock never produces an infinite correction.
///
/// # Example
/// ```
/// use stance_core::control::{Pid, PidConfig};
///
/// let config = PidConfig::new(0.02, 0.001, 0.05).with_integral_limit(1.0);
/// let mut pid = Pid::new(config);
///
/// // Setpoint 0 (level), measured pitch 5 degrees
/// let output = pid.compute(0.0, 5.0, 0.001);
/// assert!(output < 0.0);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Pid {
    config: PidConfig,
    state: PidState,
}

impl Pid {
    /// Create a new PID controller with the given configuration
    pub fn new(config: PidConfig) -> Self {
        Self {
            config,
            state: PidState::default(),
        }
    }

    /// Create a simple P controller
    pub fn p(kp: f64) -> Self {
        Self::new(PidConfig::p(kp))
    }

    /// Compute the control output for a new measurement
    ///
    /// # Arguments
    /// * `setpoint` - Desired value
    /// * `measured` - Current measured value
    /// * `dt` - Time step in seconds
    #[inline]
    pub fn compute(&mut self, setpoint: f64, measured: f64, dt: f64) -> f64 {
        let error = setpoint - measured;

        let p_term = self.config.kp * error;

        // Integral term with windup protection (FMA)
        self.state.integral = error.mul_add(dt, self.state.integral);
        self.state.integral = self
            .state
            .integral
            .clamp(-self.config.integral_limit, self.config.integral_limit);
        let i_term = self.config.ki * self.state.integral;

        // Derivative only with a valid time step
        let d_term = if dt > 0.0 {
            self.config.kd * (error - self.state.prev_error) / dt
        } else {
            0.0
        };

        let output = p_term + i_term + d_term;

        self.state.prev_error = error;
        self.state.last_output = output;

        output
    }

    /// Reset the controller state, leaving the gains in place
    pub fn reset(&mut self) {
        self.state = PidState::default();
    }

    /// Output of the most recent compute call
    pub fn last_output(&self) -> f64 {
        self.state.last_output
    }

    /// Get the current state
    pub fn state(&self) -> &PidState {
        &self.state
    }

    /// Get the configuration
    pub fn config(&self) -> &PidConfig {
        &self.config
    }

    /// Replace the gains and windup limit, keeping the accumulated state
    ///
    /// A lowered limit takes effect on the next `compute`, which re-clamps
    /// the integral.
    pub fn set_params(&mut self, kp: f64, ki: f64, kd: f64, integral_limit: f64) {
        self.config.kp = kp;
        self.config.ki = ki;
        self.config.kd = kd;
        self.config.integral_limit = integral_limit;
    }
}
