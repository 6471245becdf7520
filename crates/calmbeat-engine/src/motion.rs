//! Motion signal processing for the tracked device.
//!
//! Each frame yields finite-difference estimates from the last two poses:
//!
//! - linear speed ‖Δposition‖ / dt (m/s)
//! - angular speed angle(Δorientation) / dt (degrees/s)
//! - intensity = linear_speed · w_lin + angular_speed · w_ang
//!
//! plus acceleration and jerk magnitudes from successive velocity
//! estimates. Directions of travel above a noise floor feed a short ring
//! buffer whose spread is the erratic-movement signal.

use std::collections::VecDeque;

use calmbeat_core::{MotionSample, Velocity3D};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Motion processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Weight of linear speed in the intensity score
    pub linear_weight: f64,
    /// Weight of angular speed (degrees/s) in the intensity score
    pub angular_weight: f64,
    /// Minimum linear speed for a direction to be recorded (m/s)
    pub direction_noise_floor: f64,
    /// Number of recent directions kept for variance estimation
    pub direction_history_capacity: usize,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            linear_weight: 2.0,
            angular_weight: 0.1,
            direction_noise_floor: 0.1,
            direction_history_capacity: 10,
        }
    }
}

/// Per-frame motion estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionReading {
    /// Linear velocity (m/s)
    pub velocity: Velocity3D,
    /// Linear speed (m/s)
    pub linear_speed: f64,
    /// Angular speed (degrees/s)
    pub angular_speed: f64,
    /// Weighted motion intensity, never negative
    pub intensity: f64,
    /// Linear acceleration magnitude (m/s²), zero until two velocities exist
    pub acceleration: f64,
    /// Jerk magnitude (m/s³), zero until two accelerations exist
    pub jerk: f64,
    /// Linear speed is above the direction noise floor
    pub is_moving: bool,
    /// First moving frame after a still one
    pub movement_onset: bool,
}

impl MotionReading {
    /// A reading for a device that has not moved
    pub fn at_rest() -> Self {
        Self {
            velocity: Velocity3D::zero(),
            linear_speed: 0.0,
            angular_speed: 0.0,
            intensity: 0.0,
            acceleration: 0.0,
            jerk: 0.0,
            is_moving: false,
            movement_onset: false,
        }
    }
}

impl Default for MotionReading {
    fn default() -> Self {
        Self::at_rest()
    }
}

/// Fixed-capacity ring of unit direction vectors, oldest overwritten first
#[derive(Debug, Clone)]
pub struct DirectionHistory {
    directions: VecDeque<Vector3<f64>>,
    capacity: usize,
}

impl DirectionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            directions: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a direction. Non-unit input is normalized; zero vectors are ignored.
    pub fn push(&mut self, direction: Vector3<f64>) {
        let Some(unit) = direction.try_normalize(1e-12) else {
            return;
        };
        if self.directions.len() == self.capacity {
            self.directions.pop_front();
        }
        self.directions.push_back(unit);
    }

    pub fn len(&self) -> usize {
        self.directions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.directions.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vector3<f64>> {
        self.directions.iter()
    }

    /// Arithmetic mean of the stored directions (not renormalized)
    pub fn mean_direction(&self) -> Option<Vector3<f64>> {
        if self.directions.is_empty() {
            return None;
        }
        let sum = self
            .directions
            .iter()
            .fold(Vector3::zeros(), |acc, d| acc + d);
        Some(sum / self.directions.len() as f64)
    }

    /// Mean distance of each direction from the mean direction.
    ///
    /// `None` when nothing has been recorded, so "no data" is never mistaken
    /// for perfectly steady movement. Ranges from 0 (all identical) to 1
    /// (directions cancel out).
    pub fn variance(&self) -> Option<f64> {
        let mean = self.mean_direction()?;
        let total: f64 = self.directions.iter().map(|d| (d - mean).norm()).sum();
        Some(total / self.directions.len() as f64)
    }
}

/// Turns raw poses into speed, intensity and direction statistics
#[derive(Debug, Clone)]
pub struct MotionSignalProcessor {
    config: MotionConfig,
    last_sample: Option<MotionSample>,
    last_velocity: Option<Vector3<f64>>,
    last_acceleration: Option<Vector3<f64>>,
    history: DirectionHistory,
    was_moving: bool,
    last_reading: Option<MotionReading>,
    frames_processed: u64,
}

impl MotionSignalProcessor {
    pub fn new(config: MotionConfig) -> Self {
        let history = DirectionHistory::new(config.direction_history_capacity);
        Self {
            config,
            last_sample: None,
            last_velocity: None,
            last_acceleration: None,
            history,
            was_moving: false,
            last_reading: None,
            frames_processed: 0,
        }
    }

    /// Process one pose.
    ///
    /// Returns `None` when no estimate can be made: `dt` is not positive
    /// and finite, the sample is not finite, or this is the first pose. A
    /// skipped frame leaves all state (including the direction ring)
    /// untouched, except that a first pose is cached as the reference.
    pub fn update(&mut self, sample: &MotionSample, dt: f64) -> Option<MotionReading> {
        if !(dt > 0.0) || !dt.is_finite() || !sample.is_finite() {
            return None;
        }

        let Some(previous) = self.last_sample.replace(*sample) else {
            return None;
        };

        let velocity = Velocity3D::between(&previous.position, &sample.position, dt);
        let linear_speed = velocity.magnitude();
        let angular_speed = previous.orientation.angle_to_degrees(&sample.orientation) / dt;

        let intensity = (linear_speed * self.config.linear_weight
            + angular_speed * self.config.angular_weight)
            .max(0.0);

        let v = velocity.to_vector();
        let acceleration = self.last_velocity.map(|prev| (v - prev) / dt);
        let jerk = match (acceleration, self.last_acceleration) {
            (Some(a), Some(prev)) => (a - prev).norm() / dt,
            _ => 0.0,
        };
        self.last_velocity = Some(v);
        self.last_acceleration = acceleration;

        let is_moving = linear_speed > self.config.direction_noise_floor;
        if is_moving {
            self.history.push(v);
        }
        let movement_onset = is_moving && !self.was_moving;
        self.was_moving = is_moving;

        let reading = MotionReading {
            velocity,
            linear_speed,
            angular_speed,
            intensity: if intensity.is_finite() { intensity } else { 0.0 },
            acceleration: acceleration.map_or(0.0, |a| a.norm()),
            jerk,
            is_moving,
            movement_onset,
        };

        self.last_reading = Some(reading);
        self.frames_processed += 1;
        Some(reading)
    }

    /// Direction spread in [0, 1], or 0 when no direction was recorded.
    ///
    /// Use [`has_direction_data`](Self::has_direction_data) or
    /// [`direction_variance_checked`](Self::direction_variance_checked) to
    /// tell an empty ring from a populated one with zero spread.
    pub fn direction_variance(&self) -> f64 {
        self.history.variance().unwrap_or(0.0)
    }

    pub fn direction_variance_checked(&self) -> Option<f64> {
        self.history.variance()
    }

    pub fn has_direction_data(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn direction_history(&self) -> &DirectionHistory {
        &self.history
    }

    /// Forget recorded directions, so later statistics reflect only new movement
    pub fn clear_direction_history(&mut self) {
        self.history.clear();
    }

    pub fn last_reading(&self) -> Option<&MotionReading> {
        self.last_reading.as_ref()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    pub fn reset(&mut self) {
        self.last_sample = None;
        self.last_velocity = None;
        self.last_acceleration = None;
        self.history.clear();
        self.was_moving = false;
        self.last_reading = None;
        self.frames_processed = 0;
    }
}

impl Default for MotionSignalProcessor {
    fn default() -> Self {
        Self::new(MotionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calmbeat_core::{Orientation3D, Position3D};
    use std::f64::consts::FRAC_PI_2;

    fn sample(x: f64, y: f64, z: f64) -> MotionSample {
        MotionSample::at(Position3D::new(x, y, z))
    }

    #[test]
    fn test_first_sample_is_reference() {
        let mut processor = MotionSignalProcessor::default();
        assert!(processor.update(&sample(0.0, 0.0, 0.0), 0.1).is_none());
        assert!(processor.update(&sample(0.1, 0.0, 0.0), 0.1).is_some());
    }

    #[test]
    fn test_linear_intensity() {
        let mut processor = MotionSignalProcessor::default();
        processor.update(&sample(0.0, 0.0, 0.0), 0.1);

        let reading = processor.update(&sample(0.1, 0.0, 0.0), 0.1).unwrap();
        assert!((reading.linear_speed - 1.0).abs() < 1e-9);
        assert!(reading.angular_speed.abs() < 1e-9);
        assert!((reading.intensity - 2.0).abs() < 1e-9);
        assert!(reading.is_moving);
        assert!(reading.movement_onset);
    }

    #[test]
    fn test_angular_intensity() {
        let mut processor = MotionSignalProcessor::default();
        processor.update(&MotionSample::default(), 0.5);

        let turned = MotionSample::new(
            Position3D::origin(),
            Orientation3D::from_euler(0.0, 0.0, FRAC_PI_2),
        );
        let reading = processor.update(&turned, 0.5).unwrap();

        // 90 degrees over half a second
        assert!((reading.angular_speed - 180.0).abs() < 1e-6);
        assert!((reading.intensity - 18.0).abs() < 1e-6);
        assert!(!reading.is_moving);
    }

    #[test]
    fn test_tunable_weights() {
        let mut processor = MotionSignalProcessor::new(MotionConfig {
            linear_weight: 1.0,
            angular_weight: 0.0,
            ..Default::default()
        });
        processor.update(&sample(0.0, 0.0, 0.0), 0.1);
        let reading = processor.update(&sample(0.1, 0.0, 0.0), 0.1).unwrap();
        assert!((reading.intensity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_dt_skipped() {
        let mut processor = MotionSignalProcessor::default();
        processor.update(&sample(0.0, 0.0, 0.0), 0.1);
        processor.update(&sample(0.5, 0.0, 0.0), 0.1);
        let len = processor.direction_history().len();

        assert!(processor.update(&sample(1.0, 0.0, 0.0), 0.0).is_none());
        assert!(processor.update(&sample(1.0, 0.0, 0.0), -0.1).is_none());
        assert_eq!(processor.direction_history().len(), len);

        // The skipped pose was not cached: the next delta is from x = 0.5
        let reading = processor.update(&sample(0.6, 0.0, 0.0), 0.1).unwrap();
        assert!((reading.linear_speed - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_noise_floor_filters_jitter() {
        let mut processor = MotionSignalProcessor::default();
        processor.update(&sample(0.0, 0.0, 0.0), 0.1);

        // 0.05 m/s stays below the 0.1 m/s floor
        for i in 1..20 {
            processor.update(&sample(0.005 * i as f64, 0.0, 0.0), 0.1);
        }
        assert!(!processor.has_direction_data());
        assert_eq!(processor.direction_variance_checked(), None);
    }

    #[test]
    fn test_empty_history_distinguishable() {
        let processor = MotionSignalProcessor::default();
        assert_eq!(processor.direction_variance(), 0.0);
        assert!(!processor.has_direction_data());

        let mut steady = MotionSignalProcessor::default();
        steady.update(&sample(0.0, 0.0, 0.0), 0.1);
        for i in 1..=5 {
            steady.update(&sample(0.1 * i as f64, 0.0, 0.0), 0.1);
        }
        assert!(steady.has_direction_data());
        let variance = steady.direction_variance_checked().unwrap();
        assert!(variance.abs() < 1e-9);
    }

    #[test]
    fn test_erratic_directions_have_high_variance() {
        let mut processor = MotionSignalProcessor::default();
        processor.update(&sample(0.0, 0.0, 0.0), 0.1);

        // Back and forth along x
        for i in 1..=10 {
            let x = if i % 2 == 1 { 0.1 } else { 0.0 };
            processor.update(&sample(x, 0.0, 0.0), 0.1);
        }
        let variance = processor.direction_variance();
        assert!((variance - 1.0).abs() < 1e-9, "variance = {}", variance);
    }

    #[test]
    fn test_ring_overwrites_oldest() {
        let mut history = DirectionHistory::new(3);
        history.push(Vector3::new(-1.0, 0.0, 0.0));
        for _ in 0..3 {
            history.push(Vector3::new(2.0, 0.0, 0.0));
        }
        assert_eq!(history.len(), 3);
        assert!(history.variance().unwrap().abs() < 1e-12);
        assert!(history.iter().all(|d| (d.norm() - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_zero_direction_ignored() {
        let mut history = DirectionHistory::new(4);
        history.push(Vector3::zeros());
        assert!(history.is_empty());
    }

    #[test]
    fn test_movement_onset_edges() {
        let mut processor = MotionSignalProcessor::default();
        processor.update(&sample(0.0, 0.0, 0.0), 0.1);

        let moving = processor.update(&sample(0.1, 0.0, 0.0), 0.1).unwrap();
        assert!(moving.movement_onset);

        let still_moving = processor.update(&sample(0.2, 0.0, 0.0), 0.1).unwrap();
        assert!(!still_moving.movement_onset);

        let stopped = processor.update(&sample(0.2, 0.0, 0.0), 0.1).unwrap();
        assert!(!stopped.is_moving);

        let again = processor.update(&sample(0.3, 0.0, 0.0), 0.1).unwrap();
        assert!(again.movement_onset);
    }

    #[test]
    fn test_acceleration_and_jerk() {
        let mut processor = MotionSignalProcessor::default();
        processor.update(&sample(0.0, 0.0, 0.0), 1.0);

        // Velocities 1, 3, 7 m/s: accelerations 2, 4 m/s², jerk 2 m/s³
        let first = processor.update(&sample(1.0, 0.0, 0.0), 1.0).unwrap();
        assert_eq!(first.acceleration, 0.0);
        assert_eq!(first.jerk, 0.0);

        let second = processor.update(&sample(4.0, 0.0, 0.0), 1.0).unwrap();
        assert!((second.acceleration - 2.0).abs() < 1e-9);
        assert_eq!(second.jerk, 0.0);

        let third = processor.update(&sample(11.0, 0.0, 0.0), 1.0).unwrap();
        assert!((third.acceleration - 4.0).abs() < 1e-9);
        assert!((third.jerk - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_sample_skipped() {
        let mut processor = MotionSignalProcessor::default();
        processor.update(&sample(0.0, 0.0, 0.0), 0.1);
        assert!(processor.update(&sample(f64::NAN, 0.0, 0.0), 0.1).is_none());
        assert_eq!(processor.frames_processed(), 0);
    }
}
