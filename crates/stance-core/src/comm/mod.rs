//! Communication primitives
//!
//! Channels carry telemetry from the balance loop to observers without
//! blocking the loop; a full channel drops the tick's snapshot.

mod channel;

pub use channel::{bounded_channel, Receiver, Sender};
