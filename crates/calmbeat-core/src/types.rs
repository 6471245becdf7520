//! Fundamental types for the CalmBeat system.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::{Orientation3D, Position3D};

/// One raw pose of the tracked device, delivered once per frame.
///
/// Samples carry no timestamp: the frame scheduler supplies the elapsed
/// time alongside each one.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionSample {
    pub position: Position3D,
    pub orientation: Orientation3D,
}

impl MotionSample {
    pub fn new(position: Position3D, orientation: Orientation3D) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn at(position: Position3D) -> Self {
        Self::new(position, Orientation3D::identity())
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.orientation.is_finite()
    }

    /// Reject poses no speed estimate can be made from
    pub fn validate(&self) -> Result<()> {
        if !self.position.is_finite() {
            return Err(Error::InvalidInput(format!(
                "non-finite position ({}, {}, {})",
                self.position.x, self.position.y, self.position.z
            )));
        }
        if !self.orientation.is_finite() {
            return Err(Error::InvalidInput("non-finite orientation".to_string()));
        }
        if self.orientation.norm_squared() < 1e-24 {
            return Err(Error::InvalidInput("zero-length orientation quaternion".to_string()));
        }
        Ok(())
    }
}

/// Inclusive tempo bounds (beats per minute)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoRange {
    pub min_bpm: f64,
    pub max_bpm: f64,
}

impl TempoRange {
    pub fn new(min_bpm: f64, max_bpm: f64) -> Self {
        Self { min_bpm, max_bpm }
    }

    /// Positive, finite and ordered
    pub fn is_valid(&self) -> bool {
        self.min_bpm.is_finite()
            && self.max_bpm.is_finite()
            && self.min_bpm > 0.0
            && self.min_bpm <= self.max_bpm
    }

    pub fn clamp(&self, bpm: f64) -> f64 {
        bpm.clamp(self.min_bpm, self.max_bpm)
    }

    pub fn contains(&self, bpm: f64) -> bool {
        bpm >= self.min_bpm && bpm <= self.max_bpm
    }

    /// Position of `bpm` within the range, 0 at the floor and 1 at the ceiling
    pub fn fraction(&self, bpm: f64) -> f64 {
        let span = self.max_bpm - self.min_bpm;
        if span <= 0.0 {
            return 0.0;
        }
        ((self.clamp(bpm) - self.min_bpm) / span).clamp(0.0, 1.0)
    }

    /// Shortest beat interval the range allows (seconds)
    pub fn min_interval_secs(&self) -> f64 {
        60.0 / self.max_bpm
    }
}

impl Default for TempoRange {
    fn default() -> Self {
        Self::new(50.0, 120.0)
    }
}

/// Beats per minute, always inside its [`TempoRange`]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Tempo(f64);

impl Tempo {
    /// Clamp `bpm` into `range`. Non-finite input lands on the floor.
    pub fn new(bpm: f64, range: &TempoRange) -> Self {
        if !bpm.is_finite() {
            return Self(range.min_bpm);
        }
        Self(range.clamp(bpm))
    }

    pub fn bpm(&self) -> f64 {
        self.0
    }

    /// Seconds per beat, `60 / bpm`
    pub fn interval_secs(&self) -> f64 {
        60.0 / self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_validation() {
        assert!(MotionSample::at(Position3D::new(0.1, 1.2, -0.3)).validate().is_ok());

        let nan = MotionSample::at(Position3D::new(f64::NAN, 0.0, 0.0));
        assert!(matches!(nan.validate(), Err(Error::InvalidInput(_))));

        let zero = MotionSample::new(
            Position3D::origin(),
            Orientation3D { w: 0.0, x: 0.0, y: 0.0, z: 0.0 },
        );
        assert!(matches!(zero.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_tempo_clamping() {
        let range = TempoRange::default();

        for requested in [-10.0, 0.0, 30.0, 50.0, 60.0, 87.5, 120.0, 121.0, 1e9] {
            let tempo = Tempo::new(requested, &range);
            assert!(range.contains(tempo.bpm()), "tempo {} escaped range", tempo.bpm());
            assert!((tempo.interval_secs() - 60.0 / tempo.bpm()).abs() < 1e-12);
            assert!(tempo.interval_secs() > 0.0 && tempo.interval_secs().is_finite());
        }

        assert_eq!(Tempo::new(30.0, &range).bpm(), 50.0);
        assert_eq!(Tempo::new(200.0, &range).bpm(), 120.0);
        assert_eq!(Tempo::new(f64::NAN, &range).bpm(), 50.0);
    }

    #[test]
    fn test_range_fraction() {
        let range = TempoRange::default();
        assert_eq!(range.fraction(50.0), 0.0);
        assert_eq!(range.fraction(120.0), 1.0);
        assert!((range.fraction(85.0) - 0.5).abs() < 1e-12);
        assert!((range.min_interval_secs() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_range_validity() {
        assert!(TempoRange::default().is_valid());
        assert!(!TempoRange::new(120.0, 50.0).is_valid());
        assert!(!TempoRange::new(0.0, 50.0).is_valid());
        assert!(!TempoRange::new(50.0, f64::INFINITY).is_valid());
    }
}
