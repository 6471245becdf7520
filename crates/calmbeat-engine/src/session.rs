//! Per-frame scheduler wiring the four components together.
//!
//! One call to [`BiofeedbackSession::process_frame`] advances everything in
//! a fixed order:
//!
//! 1. beat clock
//! 2. motion processing
//! 3. overwhelm classification
//! 4. judgement of a new active movement, unless overwhelmed
//! 5. idle and celebration timers
//!
//! Each stage reads the output of the ones before it. Events are published
//! through the session's [`EventHub`] as they happen.

use calmbeat_core::{MotionSample, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::beat_clock::{BeatClock, BeatPulse};
use crate::config::SessionConfig;
use crate::events::{EventHub, SessionEvent, SubscriptionId};
use crate::motion::{MotionReading, MotionSignalProcessor};
use crate::overwhelm::{
    MotionSignal, OverwhelmGate, OverwhelmState, OverwhelmStateMachine, OverwhelmTransition,
};
use crate::progress::{ProgressUpdate, SessionProgressTracker};

/// How an active movement was scored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Judgement {
    OnBeat,
    OffBeat,
    /// The player was overwhelmed; nothing was recorded
    Suppressed,
}

/// Everything that happened during one frame
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub beat: Option<BeatPulse>,
    pub reading: Option<MotionReading>,
    pub transition: Option<OverwhelmTransition>,
    /// Set only on the frame where active movement starts
    pub judgement: Option<Judgement>,
    pub progress: ProgressUpdate,
}

/// Read-only view for presentation collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub bpm: f64,
    pub beat_window_open: bool,
    pub overwhelm_state: OverwhelmState,
    pub completed_sections: usize,
    pub total_sections: usize,
    pub engagement_intensity: f64,
    pub consecutive_hits: u32,
    pub elapsed_secs: f64,
}

impl SessionSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A running biofeedback session
#[derive(Debug)]
pub struct BiofeedbackSession {
    active_threshold: f64,
    clock: BeatClock,
    motion: MotionSignalProcessor,
    overwhelm: OverwhelmStateMachine,
    progress: SessionProgressTracker,
    hub: EventHub,
    was_active: bool,
    frames: u64,
    elapsed: f64,
}

impl BiofeedbackSession {
    pub fn new(config: SessionConfig) -> Self {
        let overwhelm = OverwhelmStateMachine::from_config(&config.overwhelm);
        debug!(
            policy = overwhelm.policy_name().unwrap_or("disabled"),
            bpm = config.clock.initial_bpm,
            "session created"
        );

        Self {
            active_threshold: config.active_threshold,
            clock: BeatClock::new(config.clock),
            motion: MotionSignalProcessor::new(config.motion),
            overwhelm,
            progress: SessionProgressTracker::new(config.progress),
            hub: EventHub::new(),
            was_active: false,
            frames: 0,
            elapsed: 0.0,
        }
    }

    /// Validate the configuration, then build the session
    pub fn try_new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Advance the session by one frame.
    ///
    /// A non-positive or non-finite `dt` leaves every timer untouched.
    pub fn process_frame(&mut self, sample: &MotionSample, dt: f64) -> FrameReport {
        let mut report = FrameReport::default();
        if !(dt > 0.0) || !dt.is_finite() {
            return report;
        }
        self.frames += 1;
        self.elapsed += dt;

        report.beat = self.clock.tick(dt);
        if let Some(pulse) = report.beat {
            for index in pulse.indices() {
                self.hub.publish(SessionEvent::BeatPulse {
                    index,
                    bpm: pulse.bpm,
                });
            }
        }

        report.reading = match sample.validate() {
            Ok(()) => self.motion.update(sample, dt),
            Err(err) => {
                debug!(%err, "pose skipped");
                None
            }
        };
        let reading = report.reading.unwrap_or_else(MotionReading::at_rest);

        let signal = MotionSignal {
            intensity: reading.intensity,
            is_moving: reading.is_moving,
            movement_onset: reading.movement_onset,
            direction_variance: self.motion.direction_variance_checked(),
        };
        report.transition = self.overwhelm.update(&signal, dt);
        match report.transition {
            Some(OverwhelmTransition::Began(reason)) => {
                self.progress.on_overwhelm();
                // Recovery is judged on movement made after onset
                self.motion.clear_direction_history();
                self.hub.publish(SessionEvent::OverwhelmBegan { reason });
            }
            Some(OverwhelmTransition::CalmRestored) => {
                self.hub.publish(SessionEvent::CalmRestored);
            }
            None => {}
        }

        if report.reading.is_some() {
            let active = reading.intensity > self.active_threshold;
            if active && !self.was_active {
                report.judgement = Some(self.judge_active_movement(&mut report.progress));
            }
            self.was_active = active;
        }

        let idle = self.progress.tick(dt, &mut self.clock);
        if idle.idle_encouragement {
            self.hub.publish(SessionEvent::IdleEncouragement);
        }
        merge_update(&mut report.progress, idle);

        report
    }

    fn judge_active_movement(&mut self, update: &mut ProgressUpdate) -> Judgement {
        let on_beat = self.clock.is_on_beat();
        let Some(judged) = self
            .progress
            .judge_gated(on_beat, &self.overwhelm, &mut self.clock)
        else {
            return Judgement::Suppressed;
        };

        if let Some(index) = judged.section_completed {
            self.hub.publish(SessionEvent::SectionCompleted { index });
        }
        if judged.session_completed {
            self.hub.publish(SessionEvent::SessionCompleted);
        }
        if let Some(tempo) = judged.tempo_raised {
            self.hub.publish(SessionEvent::TempoChanged { bpm: tempo.bpm() });
        }
        merge_update(update, judged);

        if on_beat {
            Judgement::OnBeat
        } else {
            Judgement::OffBeat
        }
    }

    /// Register a callback for every session event
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&SessionEvent) + Send + 'static,
    {
        self.hub.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }

    /// Receive session events through a broadcast channel
    pub fn channel(&mut self, capacity: usize) -> broadcast::Receiver<SessionEvent> {
        self.hub.channel(capacity)
    }

    /// Drop every listener. Further frames still run but notify nobody.
    pub fn shutdown(&mut self) {
        self.hub.clear();
        info!(
            frames = self.frames,
            elapsed_secs = self.elapsed,
            completed = self.progress.completed_sections(),
            episodes = self.overwhelm.episodes(),
            "session shut down"
        );
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            bpm: self.clock.bpm(),
            beat_window_open: self.clock.is_on_beat(),
            overwhelm_state: self.overwhelm.state(),
            completed_sections: self.progress.completed_sections(),
            total_sections: self.progress.progress().sections.len(),
            engagement_intensity: self.progress.engagement_intensity(),
            consecutive_hits: self.progress.consecutive_hits(),
            elapsed_secs: self.elapsed,
        }
    }

    pub fn tempo(&self) -> f64 {
        self.clock.bpm()
    }

    pub fn is_on_beat(&self) -> bool {
        self.clock.is_on_beat()
    }

    pub fn overwhelm_state(&self) -> OverwhelmState {
        self.overwhelm.state()
    }

    pub fn is_overwhelmed(&self) -> bool {
        self.overwhelm.is_overwhelmed()
    }

    pub fn completed_sections(&self) -> usize {
        self.progress.completed_sections()
    }

    pub fn engagement_intensity(&self) -> f64 {
        self.progress.engagement_intensity()
    }

    pub fn clock(&self) -> &BeatClock {
        &self.clock
    }

    pub fn motion(&self) -> &MotionSignalProcessor {
        &self.motion
    }

    pub fn overwhelm(&self) -> &OverwhelmStateMachine {
        &self.overwhelm
    }

    pub fn progress(&self) -> &SessionProgressTracker {
        &self.progress
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed
    }
}

impl Default for BiofeedbackSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

fn merge_update(into: &mut ProgressUpdate, from: ProgressUpdate) {
    into.section_completed = into.section_completed.or(from.section_completed);
    into.session_completed |= from.session_completed;
    into.tempo_raised = from.tempo_raised.or(into.tempo_raised);
    into.tempo_lowered = from.tempo_lowered.or(into.tempo_lowered);
    into.idle_encouragement |= from.idle_encouragement;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overwhelm::{OverwhelmPolicyConfig, OverwhelmReason};
    use calmbeat_core::Position3D;
    use std::sync::{Arc, Mutex};

    const DT: f64 = 0.05;

    fn at(x: f64) -> MotionSample {
        MotionSample::at(Position3D::new(x, 0.0, 0.0))
    }

    #[test]
    fn test_first_frame_has_no_reading() {
        let mut session = BiofeedbackSession::default();
        let report = session.process_frame(&at(0.0), DT);
        assert!(report.reading.is_none());
        assert!(report.judgement.is_none());
        assert_eq!(session.frames(), 1);
    }

    #[test]
    fn test_invalid_dt_is_ignored() {
        let mut session = BiofeedbackSession::default();
        session.process_frame(&at(0.0), DT);
        let report = session.process_frame(&at(5.0), 0.0);
        assert!(report.reading.is_none());
        assert_eq!(session.frames(), 1);
        assert!((session.elapsed_secs() - DT).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_pose_skips_motion_only() {
        let mut session = BiofeedbackSession::default();
        session.process_frame(&at(0.0), DT);

        let broken = MotionSample::new(
            Position3D::origin(),
            calmbeat_core::Orientation3D { w: 0.0, x: 0.0, y: 0.0, z: 0.0 },
        );
        let report = session.process_frame(&broken, DT);
        assert!(report.reading.is_none());
        assert_eq!(session.motion().frames_processed(), 0);
        assert!((session.clock().phase() - 0.1).abs() < 1e-9);

        // The last good pose is still the reference
        let report = session.process_frame(&at(0.1), DT);
        assert!((report.reading.unwrap().linear_speed - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_stalled_frame_publishes_one_beat() {
        let mut session = BiofeedbackSession::default();
        let mut rx = session.channel(64);
        session.process_frame(&at(0.0), DT);
        session.process_frame(&at(0.0), 3600.0);

        let beats = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, SessionEvent::BeatPulse { .. }))
            .count();
        assert_eq!(beats, 1);
    }

    #[test]
    fn test_beat_pulse_published() {
        let mut session = BiofeedbackSession::default();
        let mut rx = session.channel(64);

        for _ in 0..20 {
            session.process_frame(&at(0.0), DT);
        }

        match rx.try_recv() {
            Ok(SessionEvent::BeatPulse { index, bpm }) => {
                assert_eq!(index, 1);
                assert_eq!(bpm, 60.0);
            }
            other => panic!("expected beat pulse, got {:?}", other),
        }
        assert!(session.is_on_beat());
    }

    #[test]
    fn test_movement_in_window_is_on_beat() {
        let mut session = BiofeedbackSession::default();
        for _ in 0..20 {
            session.process_frame(&at(0.0), DT);
        }

        let report = session.process_frame(&at(0.1), DT);
        assert_eq!(report.judgement, Some(Judgement::OnBeat));
        assert_eq!(report.progress.section_completed, Some(0));
        assert_eq!(session.progress().consecutive_hits(), 1);
        assert!((session.engagement_intensity() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_movement_outside_window_is_off_beat() {
        let mut session = BiofeedbackSession::default();
        for _ in 0..10 {
            session.process_frame(&at(0.0), DT);
        }

        let report = session.process_frame(&at(0.1), DT);
        assert_eq!(report.judgement, Some(Judgement::OffBeat));
        assert_eq!(session.progress().total_misses(), 1);
    }

    #[test]
    fn test_sustained_movement_judged_once() {
        let mut session = BiofeedbackSession::default();
        session.process_frame(&at(0.0), DT);

        let mut judged = 0;
        let mut x = 0.0;
        for _ in 0..10 {
            x += 0.1;
            if session.process_frame(&at(x), DT).judgement.is_some() {
                judged += 1;
            }
        }
        assert_eq!(judged, 1);
    }

    #[test]
    fn test_overwhelm_suppresses_judgement() {
        let mut session = BiofeedbackSession::default();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        session.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        session.process_frame(&at(0.0), DT);

        // 10 m/s scores 20, well above the jerkiness threshold
        let mut x = 0.0;
        for _ in 0..60 {
            x += 0.5;
            session.process_frame(&at(x), DT);
        }
        assert!(session.is_overwhelmed());
        assert!(events
            .lock()
            .unwrap()
            .contains(&SessionEvent::OverwhelmBegan {
                reason: OverwhelmReason::SustainedIntensity
            }));

        // Pause then jerk again: a new active movement, but suppressed
        session.process_frame(&at(x), DT);
        x += 0.5;
        let report = session.process_frame(&at(x), DT);
        assert_eq!(report.judgement, Some(Judgement::Suppressed));
        assert_eq!(session.progress().consecutive_hits(), 0);
    }

    #[test]
    fn test_overwhelm_clears_direction_history() {
        let mut session = BiofeedbackSession::default();
        session.process_frame(&at(0.0), DT);

        let mut x = 0.0;
        let mut began = false;
        for _ in 0..60 {
            x += 0.5;
            let report = session.process_frame(&at(x), DT);
            if matches!(report.transition, Some(OverwhelmTransition::Began(_))) {
                began = true;
                assert!(!session.motion().has_direction_data());
                break;
            }
        }
        assert!(began);
    }

    #[test]
    fn test_disabled_policy_never_overwhelms() {
        let config = SessionConfig {
            overwhelm: OverwhelmPolicyConfig::Disabled,
            ..Default::default()
        };
        let mut session = BiofeedbackSession::new(config);
        session.process_frame(&at(0.0), DT);

        let mut x = 0.0;
        for _ in 0..200 {
            x += 0.5;
            session.process_frame(&at(x), DT);
        }
        assert_eq!(session.overwhelm_state(), OverwhelmState::Calm);
        assert!(session.overwhelm().policy_name().is_none());
    }

    #[test]
    fn test_idle_encouragement_published_once() {
        let mut session = BiofeedbackSession::default();
        let mut rx = session.channel(512);

        for _ in 0..200 {
            session.process_frame(&at(0.0), DT);
        }

        let mut encouragements = 0;
        while let Ok(event) = rx.try_recv() {
            if event == SessionEvent::IdleEncouragement {
                encouragements += 1;
            }
        }
        assert_eq!(encouragements, 1);
        assert!(session.tempo() < 60.0);
    }

    #[test]
    fn test_try_new_rejects_bad_config() {
        let mut config = SessionConfig::default();
        config.clock.tempo_range.max_bpm = f64::NAN;
        assert!(BiofeedbackSession::try_new(config).is_err());
    }

    #[test]
    fn test_snapshot_json() {
        let session = BiofeedbackSession::default();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.bpm, 60.0);
        assert!(!snapshot.beat_window_open);
        assert_eq!(snapshot.total_sections, 5);

        let json = snapshot.to_json().unwrap();
        assert!(json.contains(r#""overwhelm_state":"calm""#));
        let parsed: SessionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_shutdown_drops_listeners() {
        let mut session = BiofeedbackSession::default();
        let _rx = session.channel(8);
        session.subscribe(|_| {});
        session.shutdown();

        for _ in 0..40 {
            session.process_frame(&at(0.0), DT);
        }
        assert_eq!(session.clock().beat_count(), 2);
    }
}
