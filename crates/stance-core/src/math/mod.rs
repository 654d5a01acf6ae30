//! Math utilities: filters for sensor smoothing

mod filter;

pub use filter::{Filter, MovingAverageFilter, RateFilter};
