//! Offset distribution: attitude error to per-leg stance corrections
//!
//! Every tick the distributor turns the measured pitch and roll into small
//! additions to a persistent per-leg offset vector. Legs on the low side of
//! a tilt accumulate offset, which shortens them (commanded position is
//! base minus offset) until the body levels out.
//!
//! After each update the vector is floor-normalized (minimum subtracted so
//! at least one leg stays at full extension) and clamped to the usable
//! correction range.

use serde::{Deserialize, Serialize};

use crate::control::{Pid, PidConfig};
use crate::hardware::leg_idx::{FRONT_LEFT, FRONT_RIGHT, NUM_LEGS, REAR_LEFT, REAR_RIGHT};

/// Per-leg stance offsets in (front-left, front-right, rear-left, rear-right) order
///
/// Invariant after every distributor update: the minimum entry is zero and
/// every entry lies in `[0, OffsetVector::MAX]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OffsetVector([f64; NUM_LEGS]);

impl OffsetVector {
    /// Largest usable correction per leg
    pub const MAX: f64 = 0.5;

    /// All legs at full extension
    pub const ZERO: Self = Self([0.0; NUM_LEGS]);

    /// Get the offset for one leg
    #[inline]
    pub fn get(&self, leg: usize) -> f64 {
        self.0[leg]
    }

    /// The offsets as a plain array
    #[inline]
    pub fn as_array(&self) -> [f64; NUM_LEGS] {
        self.0
    }

    /// Smallest entry
    pub fn min(&self) -> f64 {
        self.0.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Largest entry
    pub fn max(&self) -> f64 {
        self.0.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Floor-normalize and clamp
    ///
    /// Subtracts the minimum entry from every leg, then clamps each entry
    /// to `[0, Self::MAX]`. Subtracting first means a uniform drift across
    /// all four legs cancels out instead of sinking the whole stance.
    pub fn renormalize(&mut self) {
        let min = self.min();
        for v in &mut self.0 {
            *v = (*v - min).clamp(0.0, Self::MAX);
        }
    }

    /// Zero all entries
    pub fn reset(&mut self) {
        self.0 = [0.0; NUM_LEGS];
    }

    fn add(&mut self, leg: usize, delta: f64) {
        self.0[leg] += delta;
    }
}

impl std::ops::Index<usize> for OffsetVector {
    type Output = f64;

    fn index(&self, leg: usize) -> &f64 {
        &self.0[leg]
    }
}

/// How corrections accumulate across updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Accumulation {
    /// Offsets persist and integrate tick over tick
    #[default]
    Persistent,
    /// Offsets are zeroed before every update; each tick stands alone
    ResetEachUpdate,
}

/// Configuration for the PID correction strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PidStrategy {
    /// Pitch-axis controller gains
    pub pitch: PidConfig,
    /// Roll-axis controller gains
    pub roll: PidConfig,
    /// Scale from controller output magnitude to per-tick offset delta
    pub correction_scale: f64,
}

impl Default for PidStrategy {
    fn default() -> Self {
        let gains = PidConfig::new(0.02, 0.001, 0.05).with_integral_limit(1.0);
        Self {
            pitch: gains,
            roll: gains,
            correction_scale: 1e-3,
        }
    }
}

impl PidStrategy {
    /// Same gains on both axes
    pub fn with_gains(mut self, config: PidConfig) -> Self {
        self.pitch = config;
        self.roll = config;
        self
    }

    /// Set the output-to-offset scale
    pub fn with_correction_scale(mut self, scale: f64) -> Self {
        self.correction_scale = scale;
        self
    }
}

/// Configuration for the threshold correction strategy
///
/// Angles inside the dead zone produce no correction at all. Outside it,
/// the correction step is `gain * |angle| * |angle|^exponent`, so an
/// exponent of zero gives the classic linear response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Dead zone half-width in degrees; tilts inside it are ignored
    pub dead_zone: f64,
    /// Per-degree step gain on the pitch axis
    pub pitch_gain: f64,
    /// Per-degree step gain on the roll axis
    pub roll_gain: f64,
    /// Power-law shaping exponent (0 = linear)
    pub exponent: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            dead_zone: 1.0,
            pitch_gain: 2e-4,
            roll_gain: 1e-4,
            exponent: 0.0,
        }
    }
}

impl ThresholdConfig {
    /// Set the dead zone half-width
    pub fn with_dead_zone(mut self, dead_zone: f64) -> Self {
        self.dead_zone = dead_zone;
        self
    }

    /// Set the per-axis gains
    pub fn with_gains(mut self, pitch_gain: f64, roll_gain: f64) -> Self {
        self.pitch_gain = pitch_gain;
        self.roll_gain = roll_gain;
        self
    }

    /// Set the shaping exponent
    pub fn with_exponent(mut self, exponent: f64) -> Self {
        self.exponent = exponent;
        self
    }

    fn step(&self, gain: f64, magnitude: f64) -> f64 {
        gain * magnitude * magnitude.powf(self.exponent)
    }
}

/// Correction strategy selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Strategy {
    /// Continuous PID correction on both axes
    Pid(PidStrategy),
    /// Dead-zone gated proportional steps
    Threshold(ThresholdConfig),
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Pid(PidStrategy::default())
    }
}

/// Turns attitude errors into the per-leg offset vector
///
/// Owns the offset vector and the per-axis PID state, so both survive
/// across balance-loop runs. The balance loop zeroes the offsets when it
/// starts; PID state is only cleared on an explicit reset.
#[derive(Debug, Clone)]
pub struct OffsetDistributor {
    strategy: Strategy,
    accumulation: Accumulation,
    pitch_pid: Pid,
    roll_pid: Pid,
    offsets: OffsetVector,
}

impl OffsetDistributor {
    /// Create a distributor for the given strategy and accumulation mode
    pub fn new(strategy: Strategy, accumulation: Accumulation) -> Self {
        let (pitch_cfg, roll_cfg) = match strategy {
            Strategy::Pid(ref s) => (s.pitch, s.roll),
            Strategy::Threshold(_) => (PidConfig::default(), PidConfig::default()),
        };
        Self {
            strategy,
            accumulation,
            pitch_pid: Pid::new(pitch_cfg),
            roll_pid: Pid::new(roll_cfg),
            offsets: OffsetVector::ZERO,
        }
    }

    /// Apply one attitude measurement and return the updated offsets
    ///
    /// `pitch` and `roll` are in degrees, `dt` in seconds. The returned
    /// vector satisfies the floor-normalization invariant.
    pub fn update(&mut self, pitch: f64, roll: f64, dt: f64) -> OffsetVector {
        if self.accumulation == Accumulation::ResetEachUpdate {
            self.offsets.reset();
        }

        match self.strategy {
            Strategy::Pid(strategy) => self.apply_pid(pitch, roll, dt, &strategy),
            Strategy::Threshold(config) => self.apply_threshold(pitch, roll, &config),
        }

        self.offsets.renormalize();
        self.offsets
    }

    /// PID strategy: correction magnitude from the controller output, pair
    /// selection from the sign of the measured angle. The opposite pair is
    /// pulled back by half the correction so the stance recenters instead
    /// of only sinking.
    fn apply_pid(&mut self, pitch: f64, roll: f64, dt: f64, strategy: &PidStrategy) {
        let pitch_out = self.pitch_pid.compute(0.0, pitch, dt);
        let c = pitch_out.abs() * strategy.correction_scale;
        if pitch > 0.0 {
            self.offsets.add(FRONT_LEFT, c);
            self.offsets.add(FRONT_RIGHT, c);
            self.offsets.add(REAR_LEFT, -c * 0.5);
            self.offsets.add(REAR_RIGHT, -c * 0.5);
        } else {
            self.offsets.add(REAR_LEFT, c);
            self.offsets.add(REAR_RIGHT, c);
            self.offsets.add(FRONT_LEFT, -c * 0.5);
            self.offsets.add(FRONT_RIGHT, -c * 0.5);
        }

        let roll_out = self.roll_pid.compute(0.0, roll, dt);
        let c = roll_out.abs() * strategy.correction_scale;
        if roll > 0.0 {
            self.offsets.add(FRONT_RIGHT, c);
            self.offsets.add(REAR_RIGHT, c);
            self.offsets.add(FRONT_LEFT, -c * 0.5);
            self.offsets.add(REAR_LEFT, -c * 0.5);
        } else {
            self.offsets.add(FRONT_LEFT, c);
            self.offsets.add(REAR_LEFT, c);
            self.offsets.add(FRONT_RIGHT, -c * 0.5);
            self.offsets.add(REAR_RIGHT, -c * 0.5);
        }
    }

    /// Threshold strategy: no correction inside the dead zone, a shaped
    /// proportional step onto the tilted pair outside it. No opposing
    /// pull-back; the floor-normalization handles recentering.
    fn apply_threshold(&mut self, pitch: f64, roll: f64, config: &ThresholdConfig) {
        if pitch > config.dead_zone {
            let step = config.step(config.pitch_gain, pitch);
            self.offsets.add(FRONT_LEFT, step);
            self.offsets.add(FRONT_RIGHT, step);
        } else if pitch < -config.dead_zone {
            let step = config.step(config.pitch_gain, -pitch);
            self.offsets.add(REAR_LEFT, step);
            self.offsets.add(REAR_RIGHT, step);
        }

        if roll > config.dead_zone {
            let step = config.step(config.roll_gain, roll);
            self.offsets.add(FRONT_RIGHT, step);
            self.offsets.add(REAR_RIGHT, step);
        } else if roll < -config.dead_zone {
            let step = config.step(config.roll_gain, -roll);
            self.offsets.add(FRONT_LEFT, step);
            self.offsets.add(REAR_LEFT, step);
        }
    }

    /// Current offsets without updating
    pub fn offsets(&self) -> OffsetVector {
        self.offsets
    }

    /// Zero the offset vector, leaving PID state intact
    pub fn reset_offsets(&mut self) {
        self.offsets.reset();
    }

    /// Clear the accumulated PID state on both axes
    pub fn reset_pids(&mut self) {
        self.pitch_pid.reset();
        self.roll_pid.reset();
    }

    /// Replace the per-axis PID parameters, keeping accumulated state
    ///
    /// The stored strategy configuration and the live controllers change
    /// together, so [`Self::strategy`] always reports the enforced
    /// parameters.
    pub fn set_gains(&mut self, pitch: PidConfig, roll: PidConfig) {
        self.pitch_pid
            .set_params(pitch.kp, pitch.ki, pitch.kd, pitch.integral_limit);
        self.roll_pid
            .set_params(roll.kp, roll.ki, roll.kd, roll.integral_limit);
        if let Strategy::Pid(ref mut s) = self.strategy {
            s.pitch = pitch;
            s.roll = roll;
        }
    }

    /// The configured strategy
    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }
}

impl Default for OffsetDistributor {
    fn default() -> Self {
        Self::new(Strategy::default(), Accumulation::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_invariant(offsets: &OffsetVector) {
        assert_relative_eq!(offsets.min(), 0.0, epsilon = 1e-12);
        for leg in 0..NUM_LEGS {
            assert!(
                (0.0..=OffsetVector::MAX).contains(&offsets.get(leg)),
                "leg {} offset {} out of range",
                leg,
                offsets.get(leg)
            );
        }
    }

    #[test]
    fn test_renormalize_floors_to_zero() {
        let mut v = OffsetVector([0.3, 0.1, 0.2, 0.4]);
        v.renormalize();
        assert_relative_eq!(v[0], 0.2);
        assert_relative_eq!(v[1], 0.0);
        assert_relative_eq!(v[2], 0.1);
        assert_relative_eq!(v[3], 0.3);
    }

    #[test]
    fn test_renormalize_cancels_uniform_drift() {
        let mut v = OffsetVector([0.2, 0.2, 0.2, 0.2]);
        v.renormalize();
        assert_eq!(v.as_array(), [0.0; 4]);
    }

    #[test]
    fn test_renormalize_clamps_to_max() {
        let mut v = OffsetVector([0.9, 0.0, 0.1, 0.2]);
        v.renormalize();
        assert_relative_eq!(v[0], OffsetVector::MAX);
        assert_relative_eq!(v[1], 0.0);
    }

    #[test]
    fn test_level_attitude_produces_no_offsets() {
        let mut dist = OffsetDistributor::default();
        for _ in 0..100 {
            let offsets = dist.update(0.0, 0.0, 0.001);
            assert_eq!(offsets.as_array(), [0.0; 4]);
        }
    }

    #[test]
    fn test_pid_positive_pitch_raises_front_pair() {
        let mut dist = OffsetDistributor::default();
        let offsets = dist.update(5.0, 0.0, 0.001);
        assert_invariant(&offsets);
        assert!(offsets.get(FRONT_LEFT) > 0.0);
        assert!(offsets.get(FRONT_RIGHT) > 0.0);
        assert_relative_eq!(offsets.get(REAR_LEFT), 0.0);
        assert_relative_eq!(offsets.get(REAR_RIGHT), 0.0);
    }

    #[test]
    fn test_pid_negative_pitch_mirrors_to_rear() {
        let mut dist = OffsetDistributor::default();
        let offsets = dist.update(-5.0, 0.0, 0.001);
        assert_invariant(&offsets);
        assert!(offsets.get(REAR_LEFT) > 0.0);
        assert!(offsets.get(REAR_RIGHT) > 0.0);
        assert_relative_eq!(offsets.get(FRONT_LEFT), 0.0);
    }

    #[test]
    fn test_pid_roll_selects_side_pairs() {
        let mut dist = OffsetDistributor::default();
        let offsets = dist.update(0.0, 3.0, 0.001);
        assert_invariant(&offsets);
        assert!(offsets.get(FRONT_RIGHT) > 0.0);
        assert!(offsets.get(REAR_RIGHT) > 0.0);
        assert_relative_eq!(offsets.get(FRONT_LEFT), 0.0);
        assert_relative_eq!(offsets.get(REAR_LEFT), 0.0);

        let mut dist = OffsetDistributor::default();
        let offsets = dist.update(0.0, -3.0, 0.001);
        assert!(offsets.get(FRONT_LEFT) > 0.0);
        assert!(offsets.get(REAR_LEFT) > 0.0);
        assert_relative_eq!(offsets.get(FRONT_RIGHT), 0.0);
    }

    #[test]
    fn test_sustained_pitch_saturates_front_pair() {
        // 5 degrees nose-up held long enough drives the front pair to the
        // clamp while the rear pair stays floored.
        let mut dist = OffsetDistributor::default();
        let mut last = OffsetVector::ZERO;
        for _ in 0..20_000 {
            let offsets = dist.update(5.0, 0.0, 0.001);
            assert_invariant(&offsets);
            assert!(offsets.get(FRONT_LEFT) >= last.get(FRONT_LEFT) - 1e-12);
            last = offsets;
        }
        assert_relative_eq!(last.get(FRONT_LEFT), OffsetVector::MAX, epsilon = 1e-9);
        assert_relative_eq!(last.get(FRONT_RIGHT), OffsetVector::MAX, epsilon = 1e-9);
        assert_relative_eq!(last.get(REAR_LEFT), 0.0);
        assert_relative_eq!(last.get(REAR_RIGHT), 0.0);
    }

    #[test]
    fn test_invariant_under_mixed_attitudes() {
        let mut dist = OffsetDistributor::default();
        let attitudes = [
            (5.0, 0.0),
            (-3.0, 2.0),
            (0.5, -4.0),
            (-0.1, 0.1),
            (12.0, -9.0),
            (0.0, 0.0),
        ];
        for _ in 0..50 {
            for &(pitch, roll) in &attitudes {
                let offsets = dist.update(pitch, roll, 0.001);
                assert_invariant(&offsets);
            }
        }
    }

    #[test]
    fn test_threshold_dead_zone_gates_correction() {
        let mut dist = OffsetDistributor::new(
            Strategy::Threshold(ThresholdConfig::default()),
            Accumulation::Persistent,
        );
        // Inside the +/-1 degree dead zone nothing moves
        for _ in 0..50 {
            let offsets = dist.update(0.9, -0.9, 0.001);
            assert_eq!(offsets.as_array(), [0.0; 4]);
        }
        // Just outside it the front pair steps up
        let offsets = dist.update(1.5, 0.0, 0.001);
        assert_relative_eq!(offsets.get(FRONT_LEFT), 2e-4 * 1.5, epsilon = 1e-12);
        assert_relative_eq!(offsets.get(FRONT_RIGHT), 2e-4 * 1.5, epsilon = 1e-12);
        assert_relative_eq!(offsets.get(REAR_LEFT), 0.0);
    }

    #[test]
    fn test_threshold_negative_axes() {
        let mut dist = OffsetDistributor::new(
            Strategy::Threshold(ThresholdConfig::default()),
            Accumulation::Persistent,
        );
        let offsets = dist.update(-2.0, -3.0, 0.001);
        assert_invariant(&offsets);
        // Rear pair from pitch, left pair from roll; rear-left gets both
        assert_relative_eq!(
            offsets.get(REAR_LEFT),
            2e-4 * 2.0 + 1e-4 * 3.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(offsets.get(REAR_RIGHT), 2e-4 * 2.0, epsilon = 1e-12);
        assert_relative_eq!(offsets.get(FRONT_LEFT), 1e-4 * 3.0, epsilon = 1e-12);
        assert_relative_eq!(offsets.get(FRONT_RIGHT), 0.0);
    }

    #[test]
    fn test_threshold_exponent_shapes_step() {
        let config = ThresholdConfig::default().with_exponent(0.5);
        let mut dist =
            OffsetDistributor::new(Strategy::Threshold(config), Accumulation::Persistent);
        let offsets = dist.update(4.0, 0.0, 0.001);
        // gain * 4 * 4^0.5 = 2e-4 * 8
        assert_relative_eq!(offsets.get(FRONT_LEFT), 2e-4 * 8.0, epsilon = 1e-12);
    }

    #[test]
    fn test_accumulation_modes_diverge() {
        let mut persistent = OffsetDistributor::new(
            Strategy::Threshold(ThresholdConfig::default()),
            Accumulation::Persistent,
        );
        let mut reset_each = OffsetDistributor::new(
            Strategy::Threshold(ThresholdConfig::default()),
            Accumulation::ResetEachUpdate,
        );

        let mut last_persistent = OffsetVector::ZERO;
        let mut last_reset = OffsetVector::ZERO;
        for _ in 0..10 {
            last_persistent = persistent.update(2.0, 0.0, 0.001);
            last_reset = reset_each.update(2.0, 0.0, 0.001);
        }
        // Persistent integrates ten steps, reset mode holds a single step
        assert_relative_eq!(
            last_persistent.get(FRONT_LEFT),
            10.0 * 2e-4 * 2.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(last_reset.get(FRONT_LEFT), 2e-4 * 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_reset_offsets_keeps_pid_state() {
        let mut dist = OffsetDistributor::default();
        dist.update(5.0, 0.0, 0.001);
        dist.update(5.0, 0.0, 0.001);
        dist.reset_offsets();
        assert_eq!(dist.offsets().as_array(), [0.0; 4]);

        // PID state carried over: the next update corrects without a
        // derivative kick from a zeroed prev_error
        let offsets = dist.update(5.0, 0.0, 0.001);
        assert!(offsets.get(FRONT_LEFT) > 0.0);
        assert!(offsets.get(FRONT_LEFT) < 0.01);
    }

    #[test]
    fn test_set_gains_routes_each_axis() {
        let mut dist = OffsetDistributor::default();
        let pitch = PidConfig::new(0.5, 0.0, 0.0).with_integral_limit(1.0);
        let roll = PidConfig::p(0.0);
        dist.set_gains(pitch, roll);

        // Roll gains are zero, so a pure roll tilt corrects nothing
        let offsets = dist.update(0.0, 8.0, 0.001);
        assert_eq!(offsets.as_array(), [0.0; 4]);

        // Pitch still corrects
        let offsets = dist.update(6.0, 0.0, 0.001);
        assert!(offsets.get(FRONT_LEFT) > 0.0);
    }

    #[test]
    fn test_set_gains_keeps_per_axis_limits() {
        let strategy = PidStrategy {
            pitch: PidConfig::new(0.02, 0.001, 0.05).with_integral_limit(1.0),
            roll: PidConfig::new(0.02, 0.001, 0.05).with_integral_limit(2.0),
            ..PidStrategy::default()
        };
        let mut dist =
            OffsetDistributor::new(Strategy::Pid(strategy), Accumulation::Persistent);

        let pitch = PidConfig::new(0.5, 0.01, 0.1).with_integral_limit(1.0);
        let roll = PidConfig::new(0.3, 0.02, 0.2).with_integral_limit(2.0);
        dist.set_gains(pitch, roll);

        let Strategy::Pid(s) = dist.strategy() else {
            panic!("expected the PID strategy");
        };
        assert_relative_eq!(s.pitch.kp, 0.5);
        assert_relative_eq!(s.pitch.integral_limit, 1.0);
        assert_relative_eq!(s.roll.kp, 0.3);
        assert_relative_eq!(s.roll.integral_limit, 2.0);
    }
}
