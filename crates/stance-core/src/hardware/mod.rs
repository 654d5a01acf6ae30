//! Hardware abstraction for the wheel-legged platform
//!
//! Provides the actuator and sensor traits the balance controller drives,
//! the platform's leg indexing and command limits, and mock hardware for
//! running without a robot.

mod mock;
mod traits;

pub use mock::{ActuatorOp, MockActuator, ScriptedImu};
pub use traits::{
    AttitudeSample, AttitudeSensor, Connection, LegActuator, SharedActuator, SharedSensor,
};

/// Leg indices, viewed from above with the nose up
pub mod leg_idx {
    pub const FRONT_LEFT: usize = 0;
    pub const FRONT_RIGHT: usize = 1;
    pub const REAR_LEFT: usize = 2;
    pub const REAR_RIGHT: usize = 3;

    pub const NUM_LEGS: usize = 4;
}

/// Command and tunable ranges
///
/// Out-of-range tunables are clamped to these bounds and logged, never
/// rejected.
pub mod limits {
    /// Leg extension travel, fully retracted to fully extended
    pub mod leg_travel {
        pub const MIN: f64 = 0.0;
        pub const MAX: f64 = 0.85;
    }

    /// Base stance position tunable
    pub mod base_position {
        pub const MIN: f64 = 0.1;
        pub const MAX: f64 = 2.0;
    }

    /// Velocity scale applied to position moves
    pub mod velocity_scale {
        pub const MIN: f64 = 0.1;
        pub const MAX: f64 = 1.0;
    }

    /// Velocity ceiling tunable
    pub mod max_velocity {
        pub const MIN: f64 = 0.1;
        pub const MAX: f64 = 5.0;
    }

    /// Wheel velocity command
    pub mod wheel_velocity {
        pub const MIN: f64 = -1.0;
        pub const MAX: f64 = 1.0;
    }
}

/// Mounting sign per leg in [`leg_idx`] order
///
/// Front-left and rear-right are mounted mirrored, so their position
/// commands are negated. Commanded position = sign * extension magnitude.
pub const LEG_SIGNS: [f64; leg_idx::NUM_LEGS] = [-1.0, 1.0, 1.0, -1.0];

/// Leg names in [`leg_idx`] order, for logging
pub const LEG_NAMES: [&str; leg_idx::NUM_LEGS] = ["FL", "FR", "RL", "RR"];

/// Mix a base velocity and differential offset into per-wheel commands
///
/// Left wheels run inverted so all four roll the same direction. The
/// offset velocity is added on the outer diagonal and subtracted on the
/// inner one, which lets the platform crab without steering geometry.
/// Every output is clamped to the wheel command range.
pub fn wheel_mix(velocity: f64, offset_velocity: f64) -> [f64; leg_idx::NUM_LEGS] {
    use limits::wheel_velocity::{MAX, MIN};
    [
        (-(velocity + offset_velocity)).clamp(MIN, MAX),
        (velocity - offset_velocity).clamp(MIN, MAX),
        (-(velocity - offset_velocity)).clamp(MIN, MAX),
        (velocity + offset_velocity).clamp(MIN, MAX),
    ]
}
