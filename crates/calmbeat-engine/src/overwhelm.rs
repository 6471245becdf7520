//! Overwhelm detection with hysteresis-based recovery.
//!
//! A two-state machine, Calm ⇄ Overwhelmed. The conditions that move it are
//! supplied by an [`OverwhelmPolicy`]; one policy is chosen per deployment:
//!
//! - [`SustainedIntensityPolicy`]: a stress timer accrues while intensity is
//!   above a jerkiness threshold and decays below it. Recovery needs a
//!   continuous stretch below half the threshold.
//! - [`CompositePolicy`]: an extended pause, erratic direction changes or a
//!   burst of rapid movements each trigger overwhelm immediately. Recovery
//!   needs a calm streak sampled once per sampling period.
//!
//! Without a policy the machine stays Calm forever.
//!
//! ## Timers
//!
//! All timers are accumulators advanced by the frame delta. The onset timer
//! only accrues while Calm and the recovery timer only while Overwhelmed;
//! entering a state resets the timer that belongs to the other one.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Slack for float accumulation when closing a sampling period
const TIMER_EPSILON: f64 = 1e-9;

/// Player state as seen by the rest of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwhelmState {
    #[default]
    Calm,
    Overwhelmed,
}

/// Why the machine entered Overwhelmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwhelmReason {
    /// Intensity stayed above the jerkiness threshold for the onset duration
    SustainedIntensity,
    /// No movement for the pause duration
    ExtendedPause,
    /// Direction spread above the erratic threshold
    ErraticMovement,
    /// Too many movement onsets within one sampling period
    RapidMovement,
}

impl OverwhelmReason {
    pub fn description(&self) -> &'static str {
        match self {
            OverwhelmReason::SustainedIntensity => "Sustained jerky movement",
            OverwhelmReason::ExtendedPause => "Extended pause detected",
            OverwhelmReason::ErraticMovement => "Erratic movement detected",
            OverwhelmReason::RapidMovement => "Rapid movement detected",
        }
    }
}

impl fmt::Display for OverwhelmReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A state change, reported exactly once per transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverwhelmTransition {
    Began(OverwhelmReason),
    CalmRestored,
}

impl OverwhelmTransition {
    /// State entered by this transition
    pub fn target(&self) -> OverwhelmState {
        match self {
            OverwhelmTransition::Began(_) => OverwhelmState::Overwhelmed,
            OverwhelmTransition::CalmRestored => OverwhelmState::Calm,
        }
    }
}

/// Per-frame input to the detector
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionSignal {
    /// Motion intensity, negative or non-finite values count as zero
    pub intensity: f64,
    /// Speed is above the noise floor this frame
    pub is_moving: bool,
    /// A movement started this frame
    pub movement_onset: bool,
    /// Direction spread, `None` when no direction has been recorded
    pub direction_variance: Option<f64>,
}

impl MotionSignal {
    fn sanitized_intensity(&self) -> f64 {
        if self.intensity.is_finite() {
            self.intensity.max(0.0)
        } else {
            0.0
        }
    }
}

/// Read-only view used to gate input judgement
pub trait OverwhelmGate {
    fn is_overwhelmed(&self) -> bool;
}

/// A rule set deciding when the player becomes overwhelmed and when they recover.
pub trait OverwhelmPolicy: fmt::Debug + Send {
    fn name(&self) -> &'static str;

    /// Advance the policy's timers by one frame and report the transition
    /// it wants, if any. `dt` is always positive and finite.
    fn evaluate(
        &mut self,
        state: OverwhelmState,
        signal: &MotionSignal,
        dt: f64,
    ) -> Option<OverwhelmTransition>;

    /// Called after the machine entered `state`
    fn on_enter(&mut self, state: OverwhelmState);
}

/// Sustained-intensity policy parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SustainedIntensityConfig {
    /// Intensity above which movement counts as jerky
    pub jerk_threshold: f64,
    /// Stress time needed before overwhelm (seconds)
    pub onset_secs: f64,
    /// Continuous calm time needed to recover (seconds)
    pub recovery_secs: f64,
}

impl Default for SustainedIntensityConfig {
    fn default() -> Self {
        Self {
            jerk_threshold: 8.0,
            onset_secs: 2.5,
            recovery_secs: 3.0,
        }
    }
}

/// Composite policy parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeConfig {
    /// Time without any movement that counts as an extended pause (seconds)
    pub pause_secs: f64,
    /// Direction spread above which movement is erratic
    pub erratic_variance: f64,
    /// Movement onsets per second above which movement is rapid
    pub rapid_rate_per_sec: f64,
    /// Calm streak needed to recover (seconds)
    pub calm_streak_secs: f64,
    /// Length of one counting and recovery sampling period (seconds)
    pub sample_period_secs: f64,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            pause_secs: 8.0,
            erratic_variance: 0.8,
            rapid_rate_per_sec: 3.0,
            calm_streak_secs: 5.0,
            sample_period_secs: 1.0,
        }
    }
}

/// Deployment choice of overwhelm policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OverwhelmPolicyConfig {
    /// No detection; the player is never considered overwhelmed
    Disabled,
    SustainedIntensity(SustainedIntensityConfig),
    Composite(CompositeConfig),
}

impl Default for OverwhelmPolicyConfig {
    fn default() -> Self {
        OverwhelmPolicyConfig::SustainedIntensity(SustainedIntensityConfig::default())
    }
}

impl OverwhelmPolicyConfig {
    pub fn build(&self) -> Option<Box<dyn OverwhelmPolicy>> {
        match self {
            OverwhelmPolicyConfig::Disabled => None,
            OverwhelmPolicyConfig::SustainedIntensity(config) => {
                Some(Box::new(SustainedIntensityPolicy::new(config.clone())))
            }
            OverwhelmPolicyConfig::Composite(config) => {
                Some(Box::new(CompositePolicy::new(config.clone())))
            }
        }
    }
}

/// Onset after sustained high intensity, recovery after sustained low intensity
#[derive(Debug, Clone)]
pub struct SustainedIntensityPolicy {
    config: SustainedIntensityConfig,
    stress_timer: f64,
    calm_timer: f64,
}

impl SustainedIntensityPolicy {
    pub fn new(config: SustainedIntensityConfig) -> Self {
        Self {
            config,
            stress_timer: 0.0,
            calm_timer: 0.0,
        }
    }

    pub fn stress_timer(&self) -> f64 {
        self.stress_timer
    }

    pub fn calm_timer(&self) -> f64 {
        self.calm_timer
    }

    pub fn config(&self) -> &SustainedIntensityConfig {
        &self.config
    }
}

impl OverwhelmPolicy for SustainedIntensityPolicy {
    fn name(&self) -> &'static str {
        "sustained_intensity"
    }

    fn evaluate(
        &mut self,
        state: OverwhelmState,
        signal: &MotionSignal,
        dt: f64,
    ) -> Option<OverwhelmTransition> {
        let intensity = signal.sanitized_intensity();
        let threshold = self.config.jerk_threshold;

        match state {
            OverwhelmState::Calm => {
                if intensity > threshold {
                    self.stress_timer += dt;
                } else {
                    self.stress_timer = (self.stress_timer - dt).max(0.0);
                }

                (self.stress_timer > self.config.onset_secs)
                    .then_some(OverwhelmTransition::Began(OverwhelmReason::SustainedIntensity))
            }
            OverwhelmState::Overwhelmed => {
                if intensity < threshold * 0.5 {
                    self.calm_timer += dt;
                } else {
                    self.calm_timer = 0.0;
                }

                (self.calm_timer > self.config.recovery_secs)
                    .then_some(OverwhelmTransition::CalmRestored)
            }
        }
    }

    fn on_enter(&mut self, state: OverwhelmState) {
        match state {
            OverwhelmState::Overwhelmed => self.calm_timer = 0.0,
            OverwhelmState::Calm => self.stress_timer = 0.0,
        }
    }
}

/// Any of pause, erratic or rapid movement triggers; a sampled calm streak recovers
#[derive(Debug, Clone)]
pub struct CompositePolicy {
    config: CompositeConfig,
    since_movement: f64,
    sample_timer: f64,
    onsets_in_period: u32,
    last_period_onsets: u32,
    calm_streak: f64,
}

impl CompositePolicy {
    pub fn new(config: CompositeConfig) -> Self {
        Self {
            config,
            since_movement: 0.0,
            sample_timer: 0.0,
            onsets_in_period: 0,
            last_period_onsets: 0,
            calm_streak: 0.0,
        }
    }

    /// Time since the last moving frame (seconds)
    pub fn since_movement(&self) -> f64 {
        self.since_movement
    }

    /// Movement onsets counted in the last completed sampling period
    pub fn last_period_onsets(&self) -> u32 {
        self.last_period_onsets
    }

    pub fn calm_streak(&self) -> f64 {
        self.calm_streak
    }

    pub fn config(&self) -> &CompositeConfig {
        &self.config
    }

    fn period(&self) -> f64 {
        if self.config.sample_period_secs > 0.0 {
            self.config.sample_period_secs
        } else {
            CompositeConfig::default().sample_period_secs
        }
    }

    /// Close the sampling period if it has elapsed, returning its onset count
    fn advance_period(&mut self, dt: f64) -> Option<u32> {
        let period = self.period();
        self.sample_timer += dt;
        if self.sample_timer + TIMER_EPSILON < period {
            return None;
        }

        // A long frame closes a single period and drops the excess
        self.sample_timer = (self.sample_timer - period).max(0.0);
        if self.sample_timer >= period {
            self.sample_timer = 0.0;
        }
        self.last_period_onsets = self.onsets_in_period;
        self.onsets_in_period = 0;
        Some(self.last_period_onsets)
    }
}

impl OverwhelmPolicy for CompositePolicy {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn evaluate(
        &mut self,
        state: OverwhelmState,
        signal: &MotionSignal,
        dt: f64,
    ) -> Option<OverwhelmTransition> {
        if signal.is_moving || signal.movement_onset {
            self.since_movement = 0.0;
        } else {
            self.since_movement += dt;
        }
        // Only onsets count toward the rapid-movement rate
        if signal.movement_onset {
            self.onsets_in_period += 1;
        }

        let closed_period = self.advance_period(dt);
        let rate_limit = self.config.rapid_rate_per_sec * self.period();

        match state {
            OverwhelmState::Calm => {
                if self.since_movement > self.config.pause_secs {
                    return Some(OverwhelmTransition::Began(OverwhelmReason::ExtendedPause));
                }

                if signal
                    .direction_variance
                    .is_some_and(|v| v > self.config.erratic_variance)
                {
                    return Some(OverwhelmTransition::Began(OverwhelmReason::ErraticMovement));
                }

                closed_period
                    .filter(|&count| count as f64 > rate_limit)
                    .map(|_| OverwhelmTransition::Began(OverwhelmReason::RapidMovement))
            }
            OverwhelmState::Overwhelmed => {
                let count = closed_period?;

                let steady = signal
                    .direction_variance
                    .map_or(true, |v| v < self.config.erratic_variance * 0.5);
                let slow = (count as f64) < rate_limit * 0.5;

                if steady && slow {
                    self.calm_streak += self.period();
                } else {
                    self.calm_streak = 0.0;
                }

                (self.calm_streak >= self.config.calm_streak_secs)
                    .then_some(OverwhelmTransition::CalmRestored)
            }
        }
    }

    fn on_enter(&mut self, state: OverwhelmState) {
        match state {
            OverwhelmState::Overwhelmed => {
                // Recovery sampling starts a full period after onset
                self.sample_timer = 0.0;
                self.onsets_in_period = 0;
                self.calm_streak = 0.0;
            }
            OverwhelmState::Calm => {
                self.since_movement = 0.0;
                self.calm_streak = 0.0;
            }
        }
    }
}

/// Calm ⇄ Overwhelmed classifier driven by a pluggable policy
#[derive(Debug)]
pub struct OverwhelmStateMachine {
    policy: Option<Box<dyn OverwhelmPolicy>>,
    state: OverwhelmState,
    last_reason: Option<OverwhelmReason>,
    time_in_state: f64,
    episodes: u32,
}

impl OverwhelmStateMachine {
    pub fn new(policy: Option<Box<dyn OverwhelmPolicy>>) -> Self {
        Self {
            policy,
            state: OverwhelmState::Calm,
            last_reason: None,
            time_in_state: 0.0,
            episodes: 0,
        }
    }

    pub fn from_config(config: &OverwhelmPolicyConfig) -> Self {
        Self::new(config.build())
    }

    /// A detector that never reports overwhelm
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Evaluate one frame. Returns the transition taken, if any.
    ///
    /// Transitions are applied at most once: a policy asking to enter the
    /// state the machine is already in is ignored.
    pub fn update(&mut self, signal: &MotionSignal, dt: f64) -> Option<OverwhelmTransition> {
        if !(dt > 0.0) || !dt.is_finite() {
            return None;
        }
        self.time_in_state += dt;

        let policy = self.policy.as_mut()?;
        let transition = policy.evaluate(self.state, signal, dt)?;

        let target = transition.target();
        if target == self.state {
            return None;
        }

        self.state = target;
        self.time_in_state = 0.0;
        policy.on_enter(target);

        match transition {
            OverwhelmTransition::Began(reason) => {
                self.last_reason = Some(reason);
                self.episodes += 1;
                info!(reason = %reason, policy = policy.name(), "overwhelm detected");
            }
            OverwhelmTransition::CalmRestored => {
                info!(policy = policy.name(), "calm restored");
            }
        }

        Some(transition)
    }

    pub fn state(&self) -> OverwhelmState {
        self.state
    }

    /// Reason for the most recent overwhelm episode
    pub fn last_reason(&self) -> Option<OverwhelmReason> {
        self.last_reason
    }

    pub fn time_in_state(&self) -> f64 {
        self.time_in_state
    }

    /// Number of overwhelm episodes so far
    pub fn episodes(&self) -> u32 {
        self.episodes
    }

    pub fn policy_name(&self) -> Option<&'static str> {
        self.policy.as_ref().map(|p| p.name())
    }
}

impl OverwhelmGate for OverwhelmStateMachine {
    fn is_overwhelmed(&self) -> bool {
        self.state == OverwhelmState::Overwhelmed
    }
}

impl Default for OverwhelmStateMachine {
    fn default() -> Self {
        Self::from_config(&OverwhelmPolicyConfig::default())
    }
}
