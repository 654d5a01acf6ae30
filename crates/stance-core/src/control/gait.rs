//! Gait blending
//!
//! Mixes cyclic leg heights from an external pattern generator with gyro
//! rate feedback on top of the base stance. The generator itself (a CPG or
//! any other source of per-leg height targets) stays behind a trait; this
//! module only owns the blend.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::hardware::leg_idx::NUM_LEGS;
use crate::hardware::{AttitudeSample, LEG_SIGNS};
use crate::math::{MovingAverageFilter, RateFilter};

/// Source of cyclic per-leg height targets, typically a CPG
pub trait GaitGenerator: Send {
    /// Advance the pattern by `dt` seconds given the current body rates.
    /// Returns the pattern's deviation measure, useful for logging.
    fn step(&mut self, pitch_rate: f64, yaw_rate: f64, dt: f64) -> f64;

    /// Current height target per leg in (FL, FR, RL, RR) order
    fn leg_heights(&self) -> [f64; NUM_LEGS];
}

/// Weights and timing for the gait blend
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GaitBlendConfig {
    /// Weight on the generator's height targets
    pub cpg_weight: f64,
    /// Gain on pitch and yaw rate feedback
    pub rate_gain: f64,
    /// Gain on roll rate feedback
    pub roll_gain: f64,
    /// Stance position the blend deviates from
    pub base_position: f64,
    /// Moving average window for the gyro rates
    pub filter_window: usize,
    /// Fixed sleep between gait ticks
    pub tick_interval: Duration,
    /// Hold at base stance before the blend starts
    pub settle: Duration,
}

impl Default for GaitBlendConfig {
    fn default() -> Self {
        Self {
            cpg_weight: 0.2,
            rate_gain: 0.05,
            roll_gain: 0.12,
            base_position: 0.85,
            filter_window: MovingAverageFilter::DEFAULT_WINDOW,
            tick_interval: Duration::from_millis(10),
            settle: Duration::from_millis(500),
        }
    }
}

impl GaitBlendConfig {
    /// Set the generator height weight
    pub fn with_cpg_weight(mut self, weight: f64) -> Self {
        self.cpg_weight = weight;
        self
    }

    /// Set the pitch/yaw rate gain
    pub fn with_rate_gain(mut self, gain: f64) -> Self {
        self.rate_gain = gain;
        self
    }

    /// Set the roll rate gain
    pub fn with_roll_gain(mut self, gain: f64) -> Self {
        self.roll_gain = gain;
        self
    }

    /// Set the base stance position
    pub fn with_base_position(mut self, base: f64) -> Self {
        self.base_position = base;
        self
    }
}

/// Blends generator heights and rate feedback into signed leg targets
pub struct GaitDrive<G> {
    config: GaitBlendConfig,
    generator: G,
    rates: RateFilter,
}

impl<G: GaitGenerator> GaitDrive<G> {
    pub fn new(generator: G, config: GaitBlendConfig) -> Self {
        let rates = RateFilter::new(config.filter_window);
        Self {
            config,
            generator,
            rates,
        }
    }

    /// Signed base stance with no gait deviation
    pub fn base_positions(&self) -> [f64; NUM_LEGS] {
        let mut out = [0.0; NUM_LEGS];
        for leg in 0..NUM_LEGS {
            out[leg] = LEG_SIGNS[leg] * self.config.base_position;
        }
        out
    }

    /// One gait tick: smooth the rates, advance the generator, blend.
    ///
    /// Each leg target is clamped between zero and its signed base so the
    /// blend can lift a leg toward zero but never push it past the stance
    /// or across its mounting sign.
    pub fn tick(&mut self, sample: AttitudeSample, dt: f64) -> [f64; NUM_LEGS] {
        let [roll_rate, pitch_rate, yaw_rate] = self.rates.update(sample.gyro);
        self.generator.step(pitch_rate, yaw_rate, dt);
        let heights = self.generator.leg_heights();

        let p = self.config.rate_gain * pitch_rate;
        let y = self.config.rate_gain * yaw_rate;
        let r = self.config.roll_gain * roll_rate;
        // Pitch and roll feedback follow the mounting sign; yaw feedback
        // splits left from right
        let corrections = [-p - y - r, p + y + r, p - y + r, -p + y - r];

        let mut out = [0.0; NUM_LEGS];
        for leg in 0..NUM_LEGS {
            let base = LEG_SIGNS[leg] * self.config.base_position;
            let blended = self.config.cpg_weight.mul_add(heights[leg], base) + corrections[leg];
            out[leg] = blended.clamp(base.min(0.0), base.max(0.0));
        }
        out
    }

    pub fn config(&self) -> &GaitBlendConfig {
        &self.config
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }
}

/// Fixed-height generator: no cycling, constant targets
///
/// Stands in for a real CPG in tests and dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticGait {
    heights: [f64; NUM_LEGS],
}

impl StaticGait {
    pub fn new(heights: [f64; NUM_LEGS]) -> Self {
        Self { heights }
    }
}

impl GaitGenerator for StaticGait {
    fn step(&mut self, _pitch_rate: f64, _yaw_rate: f64, _dt: f64) -> f64 {
        0.0
    }

    fn leg_heights(&self) -> [f64; NUM_LEGS] {
        self.heights
    }
}
