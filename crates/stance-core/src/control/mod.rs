//! Balance control
//!
//! PID regulators, attitude-to-offset distribution, the fixed-period
//! balance loop, and the gait blend drive.

mod balance;
mod gait;
mod offset;
mod pid;

pub use balance::{BalanceConfig, LoopState, LoopStats, TickTelemetry, Tunables};
pub use gait::{GaitBlendConfig, GaitDrive, GaitGenerator, StaticGait};
pub use offset::{
    Accumulation, OffsetDistributor, OffsetVector, PidStrategy, Strategy, ThresholdConfig,
};
pub use pid::{Pid, PidConfig, PidState};

pub(crate) use balance::{BalanceHandle, BalanceLoop, LoopContext, LoopStateCell};
