//! Session progress: hits, sections, engagement and tempo adaptation.
//!
//! On-beat judgements build a run of consecutive hits. The run maps onto
//! a section index (`hits / hits_per_section`, clamped to the last
//! section); reaching a section marks it complete for good. Every Nth
//! consecutive hit asks the beat clock for a slightly faster tempo.
//!
//! Off-beat judgements only end the run. Engagement intensity is never
//! reduced for a miss; it fades only while the player is idle, and the
//! tempo relaxes with it.

use calmbeat_core::Tempo;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::beat_clock::TempoControl;
use crate::overwhelm::OverwhelmGate;

/// Progress tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Number of sections (mandala rings) in a session
    pub section_count: usize,
    /// Consecutive hits per section step
    pub hits_per_section: u32,
    /// Engagement gained per on-beat hit
    pub intensity_step: f64,
    /// A tempo increase is requested every this many consecutive hits
    pub tempo_step_every: u32,
    /// Size of each tempo increase (bpm)
    pub tempo_step_bpm: f64,
    /// Hit-driven increases stop at this tempo (bpm)
    pub adaptation_ceiling_bpm: f64,
    /// Time without a judgement before the player counts as idle (seconds)
    pub idle_threshold_secs: f64,
    /// Exponential engagement decay rate while idle (per second)
    pub idle_decay_rate: f64,
    /// Tempo decrease while idle (bpm per second)
    pub idle_tempo_decay_bpm_per_sec: f64,
    /// Engagement below which an idle player is encouraged
    pub encouragement_threshold: f64,
    /// Length of the completion celebration (seconds)
    pub celebration_secs: f64,
    /// Engagement the session settles to once the celebration ends
    pub resting_intensity: f64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            section_count: 5,
            hits_per_section: 20,
            intensity_step: 0.1,
            tempo_step_every: 10,
            tempo_step_bpm: 2.0,
            adaptation_ceiling_bpm: 75.0,
            idle_threshold_secs: 5.0,
            idle_decay_rate: 0.5,
            idle_tempo_decay_bpm_per_sec: 0.5,
            encouragement_threshold: 0.1,
            celebration_secs: 3.0,
            resting_intensity: 0.5,
        }
    }
}

/// Progress state, readable by presentation layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProgress {
    /// Completion flag per section; a completed section never reverts
    pub sections: Vec<bool>,
    pub completed_count: usize,
    pub consecutive_hits: u32,
    /// Recent success in [0, 1]
    pub engagement_intensity: f64,
}

impl SessionProgress {
    pub fn new(section_count: usize) -> Self {
        Self {
            sections: vec![false; section_count],
            completed_count: 0,
            consecutive_hits: 0,
            engagement_intensity: 0.0,
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.sections.is_empty() && self.completed_count >= self.sections.len()
    }

    /// Fraction of sections completed
    pub fn completion_ratio(&self) -> f64 {
        if self.sections.is_empty() {
            return 0.0;
        }
        self.completed_count as f64 / self.sections.len() as f64
    }
}

/// What a judgement or tick produced
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressUpdate {
    /// Section newly marked complete
    pub section_completed: Option<usize>,
    /// Every section is now complete (reported once per session)
    pub session_completed: bool,
    /// Tempo after a hit-driven increase
    pub tempo_raised: Option<Tempo>,
    /// Tempo after an idle decrease
    pub tempo_lowered: Option<Tempo>,
    /// The idle player should be encouraged
    pub idle_encouragement: bool,
}

impl ProgressUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Turns hit/miss judgements into section completion and tempo requests
#[derive(Debug, Clone)]
pub struct SessionProgressTracker {
    config: ProgressConfig,
    progress: SessionProgress,
    idle_secs: f64,
    encouraged: bool,
    session_complete_reported: bool,
    celebration_remaining: Option<f64>,
    total_hits: u64,
    total_misses: u64,
}

impl SessionProgressTracker {
    pub fn new(config: ProgressConfig) -> Self {
        let progress = SessionProgress::new(config.section_count);
        Self {
            config,
            progress,
            idle_secs: 0.0,
            encouraged: false,
            session_complete_reported: false,
            celebration_remaining: None,
            total_hits: 0,
            total_misses: 0,
        }
    }

    /// Score one judged input.
    pub fn on_input_judged(
        &mut self,
        on_beat: bool,
        clock: &mut impl TempoControl,
    ) -> ProgressUpdate {
        self.idle_secs = 0.0;
        self.encouraged = false;

        let mut update = ProgressUpdate::default();

        if !on_beat {
            self.progress.consecutive_hits = 0;
            self.total_misses += 1;
            return update;
        }

        self.total_hits += 1;
        self.progress.consecutive_hits += 1;
        self.progress.engagement_intensity =
            (self.progress.engagement_intensity + self.config.intensity_step).clamp(0.0, 1.0);

        let every = self.config.tempo_step_every;
        if every > 0 && self.progress.consecutive_hits % every == 0 {
            update.tempo_raised = self.raise_tempo(clock);
        }

        self.check_section_progress(&mut update);
        update
    }

    /// Score an input unless the player is overwhelmed.
    ///
    /// Returns `None` when the gate suppressed the judgement; nothing is
    /// recorded in that case, not even a miss.
    pub fn judge_gated(
        &mut self,
        on_beat: bool,
        gate: &impl OverwhelmGate,
        clock: &mut impl TempoControl,
    ) -> Option<ProgressUpdate> {
        if gate.is_overwhelmed() {
            return None;
        }
        Some(self.on_input_judged(on_beat, clock))
    }

    /// The player became overwhelmed: the current run ends
    pub fn on_overwhelm(&mut self) {
        self.progress.consecutive_hits = 0;
    }

    /// Advance idle and celebration timers by `dt` seconds.
    pub fn tick(&mut self, dt: f64, clock: &mut impl TempoControl) -> ProgressUpdate {
        let mut update = ProgressUpdate::default();
        if !(dt > 0.0) || !dt.is_finite() {
            return update;
        }

        if let Some(remaining) = self.celebration_remaining {
            let left = remaining - dt;
            if left > 0.0 {
                self.celebration_remaining = Some(left);
            } else {
                self.celebration_remaining = None;
                self.progress.engagement_intensity = self.config.resting_intensity.clamp(0.0, 1.0);
            }
        }

        self.idle_secs += dt;
        if self.idle_secs <= self.config.idle_threshold_secs {
            return update;
        }

        let decay = (dt * self.config.idle_decay_rate).clamp(0.0, 1.0);
        self.progress.engagement_intensity *= 1.0 - decay;

        let current = clock.tempo();
        let floor = clock.tempo_range().min_bpm;
        if current.bpm() > floor {
            let target = (current.bpm() - dt * self.config.idle_tempo_decay_bpm_per_sec).max(floor);
            let applied = clock.set_tempo(target);
            if applied != current {
                update.tempo_lowered = Some(applied);
            }
        }

        if !self.encouraged
            && self.progress.engagement_intensity < self.config.encouragement_threshold
        {
            self.encouraged = true;
            update.idle_encouragement = true;
            debug!(idle_secs = self.idle_secs, "idle encouragement");
        }

        update
    }

    fn raise_tempo(&self, clock: &mut impl TempoControl) -> Option<Tempo> {
        let current = clock.tempo();
        let ceiling = self
            .config
            .adaptation_ceiling_bpm
            .min(clock.tempo_range().max_bpm);
        if current.bpm() >= ceiling {
            return None;
        }

        let target = (current.bpm() + self.config.tempo_step_bpm).min(ceiling);
        let applied = clock.set_tempo(target);
        debug!(
            from = current.bpm(),
            to = applied.bpm(),
            hits = self.progress.consecutive_hits,
            "tempo raised"
        );
        (applied != current).then_some(applied)
    }

    fn check_section_progress(&mut self, update: &mut ProgressUpdate) {
        let count = self.progress.sections.len();
        if count == 0 {
            return;
        }

        let per_section = self.config.hits_per_section.max(1);
        let index = ((self.progress.consecutive_hits / per_section) as usize).min(count - 1);
        if self.progress.sections[index] {
            return;
        }

        self.progress.sections[index] = true;
        self.progress.completed_count += 1;
        update.section_completed = Some(index);
        info!(
            section = index,
            completed = self.progress.completed_count,
            total = count,
            "section completed"
        );

        if self.progress.is_complete() && !self.session_complete_reported {
            self.session_complete_reported = true;
            update.session_completed = true;
            if self.config.celebration_secs > 0.0 {
                self.celebration_remaining = Some(self.config.celebration_secs);
            }
            info!(total_hits = self.total_hits, "session completed");
        }
    }

    pub fn progress(&self) -> &SessionProgress {
        &self.progress
    }

    pub fn consecutive_hits(&self) -> u32 {
        self.progress.consecutive_hits
    }

    pub fn engagement_intensity(&self) -> f64 {
        self.progress.engagement_intensity
    }

    pub fn completed_sections(&self) -> usize {
        self.progress.completed_count
    }

    pub fn is_section_complete(&self, index: usize) -> bool {
        self.progress.sections.get(index).copied().unwrap_or(false)
    }

    pub fn is_session_complete(&self) -> bool {
        self.progress.is_complete()
    }

    /// Time since the last judged input (seconds)
    pub fn idle_secs(&self) -> f64 {
        self.idle_secs
    }

    pub fn is_celebrating(&self) -> bool {
        self.celebration_remaining.is_some()
    }

    pub fn total_hits(&self) -> u64 {
        self.total_hits
    }

    pub fn total_misses(&self) -> u64 {
        self.total_misses
    }

    pub fn config(&self) -> &ProgressConfig {
        &self.config
    }
}

impl Default for SessionProgressTracker {
    fn default() -> Self {
        Self::new(ProgressConfig::default())
    }
}
