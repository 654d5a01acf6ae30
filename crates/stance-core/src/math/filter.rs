//! Digital filters for sensor smoothing
//!
//! The attitude sensor reports angles and angular rates at tick rate; the
//! gait blend path averages the rates over a short window before they feed
//! into leg corrections.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Trait for digital filters
pub trait Filter: Send + Sync {
    /// Update the filter with a new value and return the filtered output
    fn update(&mut self, value: f64) -> f64;

    /// Reset the filter state
    fn reset(&mut self);

    /// Get the current filtered value without updating
    fn value(&self) -> f64;
}

/// Moving average filter
///
/// Arithmetic mean of the last N samples. During warm-up (fewer than N
/// samples seen) the mean covers only what has arrived so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovingAverageFilter {
    /// Window size
    window_size: usize,
    /// Sample buffer
    buffer: VecDeque<f64>,
    /// Running sum for efficient calculation
    sum: f64,
}

impl MovingAverageFilter {
    /// Default window used for gyro rate smoothing
    pub const DEFAULT_WINDOW: usize = 5;

    /// Create a new moving average filter with the given window size
    ///
    /// # Panics
    /// Panics if window_size is 0
    pub fn new(window_size: usize) -> Self {
        assert!(window_size > 0, "Window size must be > 0");
        Self {
            window_size,
            buffer: VecDeque::with_capacity(window_size),
            sum: 0.0,
        }
    }

    /// Get the window size
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Check if the filter is fully populated
    pub fn is_full(&self) -> bool {
        self.buffer.len() == self.window_size
    }
}

impl Filter for MovingAverageFilter {
    fn update(&mut self, value: f64) -> f64 {
        self.buffer.push_back(value);
        self.sum += value;

        // Evict the oldest sample once past capacity
        if self.buffer.len() > self.window_size {
            if let Some(old) = self.buffer.pop_front() {
                self.sum -= old;
            }
        }

        self.sum / self.buffer.len() as f64
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.sum = 0.0;
    }

    fn value(&self) -> f64 {
        if self.buffer.is_empty() {
            0.0
        } else {
            self.sum / self.buffer.len() as f64
        }
    }
}

impl Default for MovingAverageFilter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}

/// Three-axis moving-average smoothing for gyro rates
///
/// One window per axis, in (roll, pitch, yaw) order to match
/// [`crate::hardware::AttitudeSample::gyro`].
#[derive(Debug, Clone)]
pub struct RateFilter {
    roll: MovingAverageFilter,
    pitch: MovingAverageFilter,
    yaw: MovingAverageFilter,
}

impl RateFilter {
    /// Create a rate filter with the given window size per axis
    pub fn new(window_size: usize) -> Self {
        Self {
            roll: MovingAverageFilter::new(window_size),
            pitch: MovingAverageFilter::new(window_size),
            yaw: MovingAverageFilter::new(window_size),
        }
    }

    /// Update with raw (roll, pitch, yaw) rates and return the smoothed rates
    pub fn update(&mut self, rates: [f64; 3]) -> [f64; 3] {
        [
            self.roll.update(rates[0]),
            self.pitch.update(rates[1]),
            self.yaw.update(rates[2]),
        ]
    }

    /// Reset all three axes
    pub fn reset(&mut self) {
        self.roll.reset();
        self.pitch.reset();
        self.yaw.reset();
    }

    /// Get the current smoothed rates without updating
    pub fn value(&self) -> [f64; 3] {
        [self.roll.value(), self.pitch.value(), self.yaw.value()]
    }
}

impl Default for RateFilter {
    fn default() -> Self {
        Self::new(MovingAverageFilter::DEFAULT_WINDOW)
    }
}
