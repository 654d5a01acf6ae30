//! Hardware abstraction traits
//!
//! The balance controller talks to the platform through two seams: a leg
//! actuator (motor bus) and an attitude sensor (IMU). Real drivers for the
//! CAN bus and the compiled IMU module live outside this crate; tests and
//! the control-surface shell use the mocks in [`super::mock`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::Result;

/// One attitude reading: orientation angles plus angular rates
///
/// Angles are in degrees, rates in degrees per second, both in
/// (roll, pitch, yaw) order. Samples are plain values; a reading is never
/// updated in place.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AttitudeSample {
    /// Roll, pitch, yaw angles (degrees)
    pub rpy: [f64; 3],
    /// Angular rates around roll, pitch, yaw (degrees/s)
    pub gyro: [f64; 3],
}

impl AttitudeSample {
    /// A perfectly level, motionless reading
    pub const LEVEL: Self = Self {
        rpy: [0.0; 3],
        gyro: [0.0; 3],
    };

    /// Construct from angles only, with zero rates
    pub fn from_angles(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self {
            rpy: [roll, pitch, yaw],
            gyro: [0.0; 3],
        }
    }

    /// Set the angular rates, (roll, pitch, yaw) order
    pub fn with_gyro(mut self, roll_rate: f64, pitch_rate: f64, yaw_rate: f64) -> Self {
        self.gyro = [roll_rate, pitch_rate, yaw_rate];
        self
    }

    /// Get the roll angle in degrees
    pub fn roll(&self) -> f64 {
        self.rpy[0]
    }

    /// Get the pitch angle in degrees
    pub fn pitch(&self) -> f64 {
        self.rpy[1]
    }

    /// Get the yaw angle in degrees
    pub fn yaw(&self) -> f64 {
        self.rpy[2]
    }
}

/// Trait for the leg/wheel motor bus
///
/// Leg positions are signed according to the platform mounting convention
/// (see [`super::LEG_SIGNS`]); callers apply the sign before dispatch.
/// Implementations own the wire protocol and report failures as
/// [`crate::Error::Hardware`].
pub trait LegActuator: Send {
    /// Power on all leg and wheel motors
    fn enable(&mut self) -> Result<()>;

    /// Power off all leg and wheel motors
    fn disable(&mut self) -> Result<()>;

    /// Command one leg to a signed position with a velocity scale
    fn set_leg_position(&mut self, leg: usize, position: f64, velocity_scale: f64) -> Result<()>;

    /// Command one wheel to a signed velocity
    fn set_wheel_velocity(&mut self, leg: usize, velocity: f64) -> Result<()>;

    /// Read the present torque of one leg motor, if the bus reports it
    fn read_torque(&mut self, leg: usize) -> Result<Option<f64>>;

    /// Release the bus; the actuator is unusable afterwards
    fn close(&mut self) -> Result<()>;
}

/// Trait for the inertial attitude source
pub trait AttitudeSensor: Send {
    /// Begin streaming attitude data
    fn start(&mut self) -> Result<()>;

    /// Read the most recent attitude sample
    fn sample(&mut self) -> Result<AttitudeSample>;

    /// Stop streaming
    fn stop(&mut self) -> Result<()>;
}

/// Presence of an optional hardware device
///
/// Disconnected is a legitimate long-lived state, not an error: the robot
/// runs with whatever subset of hardware came up, and operations on a
/// missing device succeed as no-ops.
#[derive(Debug, Default)]
pub enum Connection<T> {
    /// Device attached and usable
    Connected(T),
    /// Device absent; operations degrade to no-ops
    #[default]
    Disconnected,
}

impl<T> Connection<T> {
    /// Whether a device is attached
    pub fn is_connected(&self) -> bool {
        matches!(self, Connection::Connected(_))
    }

    /// Borrow the device, if attached
    pub fn as_ref(&self) -> Option<&T> {
        match self {
            Connection::Connected(t) => Some(t),
            Connection::Disconnected => None,
        }
    }

    /// Mutably borrow the device, if attached
    pub fn as_mut(&mut self) -> Option<&mut T> {
        match self {
            Connection::Connected(t) => Some(t),
            Connection::Disconnected => None,
        }
    }

    /// Detach, returning the device if one was attached
    pub fn take(&mut self) -> Option<T> {
        match std::mem::take(self) {
            Connection::Connected(t) => Some(t),
            Connection::Disconnected => None,
        }
    }
}

/// Shared handle to the (possibly absent) leg actuator
pub type SharedActuator = Arc<Mutex<Connection<Box<dyn LegActuator>>>>;

/// Shared handle to the (possibly absent) attitude sensor
pub type SharedSensor = Arc<Mutex<Connection<Box<dyn AttitudeSensor>>>>;
