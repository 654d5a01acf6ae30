//! stance-core: balance control for a wheel-legged quadruped
//!
//! Keeps a four-legged, wheel-equipped robot level by continuously turning
//! inertial attitude feedback into per-leg stance corrections. The wheels
//! provide locomotion; the legs adjust their extension so the body stays
//! level while rolling.
//!
//! # Modules
//!
//! - [`math`] - Filters for sensor smoothing
//! - [`comm`] - Channel primitives for telemetry
//! - [`control`] - PID, offset distribution, the balance loop, gait blending
//! - [`hardware`] - Actuator/sensor traits, platform constants, and mocks
//! - [`controller`] - Lifecycle manager tying hardware and the loop together
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   attitude    ┌──────────────┐   offsets    ┌──────────────┐
//! │   Attitude   │──────────────►│   Balance    │─────────────►│     Leg      │
//! │    Sensor    │  roll/pitch   │     Loop     │  positions   │   Actuator   │
//! └──────────────┘               └──────────────┘   + wheels   └──────────────┘
//! ```
//!
//! Motor wire protocols and IMU driver internals live outside this crate
//! behind the [`hardware::LegActuator`] and [`hardware::AttitudeSensor`]
//! traits. Either side may be absent at runtime; the loop keeps running and
//! degrades to a dry run.

#![warn(unused_must_use)]

pub mod comm;
pub mod control;
pub mod controller;
pub mod hardware;
pub mod math;

// Re-exports for convenience
pub use comm::{Receiver, Sender};
pub use control::{
    Accumulation, BalanceConfig, GaitBlendConfig, GaitDrive, GaitGenerator, LoopState, LoopStats,
    OffsetDistributor, OffsetVector, Pid, PidConfig, PidStrategy, StaticGait, Strategy,
    ThresholdConfig, TickTelemetry, Tunables,
};
pub use controller::{StanceConfig, StanceController};
pub use hardware::{AttitudeSample, AttitudeSensor, Connection, LegActuator};
pub use math::{Filter, MovingAverageFilter, RateFilter};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for stance-core
///
/// All errors should be handled appropriately. Use pattern matching
/// to handle specific error cases, or use `?` to propagate errors.
///
/// Note that an absent hardware device is not an error: attach failures
/// resolve to [`hardware::Connection::Disconnected`] and operations on a
/// disconnected device succeed as no-ops.
///
/// # Example
/// ```ignore
/// match controller.enable_all() {
///     Ok(()) => { /* motors live */ },
///     Err(Error::Hardware(msg)) => eprintln!("Enable failed: {}", msg),
///     Err(e) => return Err(e),
/// }
/// ```
#[derive(Debug, thiserror::Error)]
#[must_use = "errors must be handled or explicitly ignored with let _ = ..."]
#[non_exhaustive]
pub enum Error {
    /// Hardware-level error from the leg actuator or attitude sensor.
    /// Handle by: checking cabling and power, ensuring a safe state before retry.
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// Invalid configuration parameter.
    /// Handle by: validating config before use, checking parameter ranges.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Balance loop execution error.
    /// Handle by: checking loop stats, restarting the loop once the cause is fixed.
    #[error("Control loop error: {0}")]
    ControlLoop(String),

    /// Operation attempted in the wrong lifecycle state
    /// (e.g., gait drive while the balance loop is running).
    /// Handle by: checking [`control::LoopState`] before the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Telemetry channel was closed unexpectedly.
    /// Handle by: checking receiver status, recreating the channel.
    #[error("Channel closed")]
    ChannelClosed,

    /// Telemetry channel is full (backpressure).
    /// Handle by: draining the receiver or increasing the buffer size.
    #[error("Channel full")]
    ChannelFull,
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Hardware(format!("I/O error: {}", e))
    }
}

/// Result type alias for stance-core operations
pub type Result<T> = std::result::Result<T, Error>;
