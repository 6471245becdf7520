//! Session configuration.

use calmbeat_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::beat_clock::BeatClockConfig;
use crate::motion::MotionConfig;
use crate::overwhelm::OverwhelmPolicyConfig;
use crate::progress::ProgressConfig;

/// Complete session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Beat clock and tempo bounds
    pub clock: BeatClockConfig,

    /// Motion intensity weights and direction history
    pub motion: MotionConfig,

    /// Intensity above which a frame counts as active movement
    pub active_threshold: f64,

    /// Overwhelm detection policy for this deployment
    pub overwhelm: OverwhelmPolicyConfig,

    /// Sections, engagement and tempo adaptation
    pub progress: ProgressConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            clock: BeatClockConfig::default(),
            motion: MotionConfig::default(),
            active_threshold: 2.0,
            overwhelm: OverwhelmPolicyConfig::default(),
            progress: ProgressConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from file, with `CALMBEAT_` environment overrides
    pub fn from_file(path: &str) -> std::result::Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("CALMBEAT").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    /// Load from environment variables
    pub fn from_env() -> std::result::Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::Environment::with_prefix("CALMBEAT").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    /// Check ranges that construction would otherwise silently clamp
    pub fn validate(&self) -> Result<()> {
        let range = &self.clock.tempo_range;
        if !range.is_valid() {
            return Err(Error::Config(format!(
                "tempo range [{}, {}] must be positive and ordered",
                range.min_bpm, range.max_bpm
            )));
        }

        if !self.clock.initial_bpm.is_finite() {
            return Err(Error::Config("initial tempo must be finite".to_string()));
        }

        if !(self.clock.window_secs > 0.0) || self.clock.window_secs > range.min_interval_secs() {
            return Err(Error::Config(format!(
                "beat window {}s must be positive and at most one beat at {} bpm",
                self.clock.window_secs, range.max_bpm
            )));
        }

        check_non_negative("motion.linear_weight", self.motion.linear_weight)?;
        check_non_negative("motion.angular_weight", self.motion.angular_weight)?;
        check_non_negative("motion.direction_noise_floor", self.motion.direction_noise_floor)?;
        if self.motion.direction_history_capacity == 0 {
            return Err(Error::Config(
                "motion.direction_history_capacity must be at least 1".to_string(),
            ));
        }

        check_non_negative("active_threshold", self.active_threshold)?;

        match &self.overwhelm {
            OverwhelmPolicyConfig::Disabled => {}
            OverwhelmPolicyConfig::SustainedIntensity(c) => {
                check_non_negative("overwhelm.jerk_threshold", c.jerk_threshold)?;
                check_non_negative("overwhelm.onset_secs", c.onset_secs)?;
                check_non_negative("overwhelm.recovery_secs", c.recovery_secs)?;
            }
            OverwhelmPolicyConfig::Composite(c) => {
                check_non_negative("overwhelm.pause_secs", c.pause_secs)?;
                check_non_negative("overwhelm.erratic_variance", c.erratic_variance)?;
                check_non_negative("overwhelm.rapid_rate_per_sec", c.rapid_rate_per_sec)?;
                check_non_negative("overwhelm.calm_streak_secs", c.calm_streak_secs)?;
                if !(c.sample_period_secs > 0.0) {
                    return Err(Error::Config(
                        "overwhelm.sample_period_secs must be positive".to_string(),
                    ));
                }
            }
        }

        let p = &self.progress;
        if p.hits_per_section == 0 {
            return Err(Error::Config(
                "progress.hits_per_section must be at least 1".to_string(),
            ));
        }
        check_unit("progress.intensity_step", p.intensity_step)?;
        check_unit("progress.encouragement_threshold", p.encouragement_threshold)?;
        check_unit("progress.resting_intensity", p.resting_intensity)?;
        check_non_negative("progress.tempo_step_bpm", p.tempo_step_bpm)?;
        check_non_negative("progress.idle_threshold_secs", p.idle_threshold_secs)?;
        check_non_negative("progress.idle_decay_rate", p.idle_decay_rate)?;
        check_non_negative(
            "progress.idle_tempo_decay_bpm_per_sec",
            p.idle_tempo_decay_bpm_per_sec,
        )?;
        check_non_negative("progress.celebration_secs", p.celebration_secs)?;
        if !p.adaptation_ceiling_bpm.is_finite() {
            return Err(Error::Config(
                "progress.adaptation_ceiling_bpm must be finite".to_string(),
            ));
        }

        Ok(())
    }
}

fn check_non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} must be finite and non-negative, got {value}")))
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} must be within [0, 1], got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overwhelm::CompositeConfig;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.clock.initial_bpm, 60.0);
        assert_eq!(config.clock.tempo_range.min_bpm, 50.0);
        assert_eq!(config.clock.tempo_range.max_bpm, 120.0);
        assert_eq!(config.active_threshold, 2.0);
        assert!(matches!(
            config.overwhelm,
            OverwhelmPolicyConfig::SustainedIntensity(_)
        ));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_tempo_range() {
        let mut config = SessionConfig::default();
        config.clock.tempo_range.min_bpm = 130.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_window_longer_than_beat() {
        let mut config = SessionConfig::default();
        config.clock.window_secs = 0.75;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_sample_period() {
        let config = SessionConfig {
            overwhelm: OverwhelmPolicyConfig::Composite(CompositeConfig {
                sample_period_secs: 0.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_from_json() {
        let json = r#"{
            "active_threshold": 1.5,
            "overwhelm": { "policy": "composite", "pause_secs": 6.0 },
            "progress": { "section_count": 8 }
        }"#;
        let config: SessionConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.active_threshold, 1.5);
        assert_eq!(config.progress.section_count, 8);
        assert_eq!(config.progress.hits_per_section, 20);
        match &config.overwhelm {
            OverwhelmPolicyConfig::Composite(c) => {
                assert_eq!(c.pause_secs, 6.0);
                assert_eq!(c.erratic_variance, 0.8);
            }
            other => panic!("unexpected policy {:?}", other),
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_disabled_policy_from_json() {
        let config: SessionConfig =
            serde_json::from_str(r#"{ "overwhelm": { "policy": "disabled" } }"#).unwrap();
        assert!(matches!(config.overwhelm, OverwhelmPolicyConfig::Disabled));
    }
}
