//! Beat clock and on-time window generation.
//!
//! The clock is an accumulator advanced by the frame delta. When the
//! accumulator reaches one beat interval the interval is subtracted (the
//! remainder is kept so the beat grid does not drift) and a window opens
//! during which player input counts as on-beat.
//!
//! ## Window Timing
//!
//! Each window's closing deadline is measured from its own beat, not from
//! the frame that observed it. A window is never longer than the shortest
//! beat interval the tempo range allows, so a beat's window has always
//! closed before the next beat opens a fresh one. Tempo changes alter the
//! interval only; an open window keeps its deadline.

use calmbeat_core::{Tempo, TempoRange};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Slack for float accumulation, so ten frames of 0.1 s make one 1 s beat
const BEAT_EPSILON: f64 = 1e-9;

/// Most beats replayed by one tick; a longer stall resyncs to a single beat
const MAX_CATCH_UP_BEATS: f64 = 4.0;

/// Beat clock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatClockConfig {
    /// Tempo at session start (bpm)
    pub initial_bpm: f64,
    /// Allowed tempo bounds (bpm)
    pub tempo_range: TempoRange,
    /// How long input counts as on-beat after each tick (seconds)
    pub window_secs: f64,
    /// Audio playback rate at the tempo floor
    pub min_playback_rate: f64,
    /// Audio playback rate at the tempo ceiling
    pub max_playback_rate: f64,
}

impl Default for BeatClockConfig {
    fn default() -> Self {
        Self {
            initial_bpm: 60.0,
            tempo_range: TempoRange::default(),
            window_secs: 0.25,
            min_playback_rate: 0.95,
            max_playback_rate: 1.10,
        }
    }
}

/// The single entry point through which tempo is changed.
///
/// The progress tracker adapts tempo through this trait and never touches
/// the clock's state directly.
pub trait TempoControl {
    fn tempo(&self) -> Tempo;

    fn tempo_range(&self) -> TempoRange;

    /// Request a new tempo. Out-of-range requests are clamped; the tempo
    /// actually in effect afterwards is returned.
    fn set_tempo(&mut self, bpm: f64) -> Tempo;
}

/// Beats fired by one call to [`BeatClock::tick`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatPulse {
    /// Index of the most recent beat (the first beat of a session is 1)
    pub index: u64,
    /// Beats fired during this tick, more than one only when a frame spans
    /// several intervals
    pub fired: u64,
    /// Tempo the beats were fired at
    pub bpm: f64,
}

impl BeatPulse {
    /// Indices of every beat fired during the tick, oldest first
    pub fn indices(&self) -> impl Iterator<Item = u64> {
        self.index.saturating_sub(self.fired.saturating_sub(1))..=self.index
    }
}

/// Periodic beat generator with a bounded on-time window
#[derive(Debug, Clone)]
pub struct BeatClock {
    config: BeatClockConfig,
    range: TempoRange,
    tempo: Tempo,
    window_secs: f64,
    /// Time since the last beat, always within [0, interval)
    accumulator: f64,
    /// Time left before the open window closes
    window_remaining: Option<f64>,
    beat_count: u64,
}

impl BeatClock {
    pub fn new(config: BeatClockConfig) -> Self {
        let range = if config.tempo_range.is_valid() {
            config.tempo_range
        } else {
            warn!(
                min = config.tempo_range.min_bpm,
                max = config.tempo_range.max_bpm,
                "invalid tempo range, falling back to default"
            );
            TempoRange::default()
        };

        let tempo = Tempo::new(config.initial_bpm, &range);

        let max_window = range.min_interval_secs();
        let window_secs = if config.window_secs.is_finite() && config.window_secs > 0.0 {
            config.window_secs.min(max_window)
        } else {
            BeatClockConfig::default().window_secs.min(max_window)
        };
        if window_secs != config.window_secs {
            warn!(
                requested = config.window_secs,
                applied = window_secs,
                "beat window clamped"
            );
        }

        Self {
            config,
            range,
            tempo,
            window_secs,
            accumulator: 0.0,
            window_remaining: None,
            beat_count: 0,
        }
    }

    /// Advance the clock by `dt` seconds.
    ///
    /// Returns the beats fired during this tick, if any. A non-positive or
    /// non-finite `dt` is a no-op.
    pub fn tick(&mut self, dt: f64) -> Option<BeatPulse> {
        if !(dt > 0.0) || !dt.is_finite() {
            return None;
        }

        if let Some(remaining) = self.window_remaining {
            let left = remaining - dt;
            self.window_remaining = if left > 0.0 { Some(left) } else { None };
        }

        self.accumulator += dt;

        let interval = self.tempo.interval_secs();
        if self.accumulator + BEAT_EPSILON < interval {
            return None;
        }

        let mut fired = ((self.accumulator + BEAT_EPSILON) / interval).floor();
        if fired > MAX_CATCH_UP_BEATS {
            warn!(missed = fired, "beat clock stalled, resyncing");
            self.accumulator = self.accumulator.rem_euclid(interval);
            if self.accumulator + BEAT_EPSILON >= interval {
                self.accumulator = 0.0;
            }
            fired = 1.0;
        } else {
            self.accumulator = (self.accumulator - fired * interval).max(0.0);
        }
        let fired = fired as u64;
        self.beat_count = self.beat_count.saturating_add(fired);

        // The accumulator now holds the time elapsed since the latest beat
        let since_beat = self.accumulator;
        self.window_remaining = if since_beat < self.window_secs {
            Some(self.window_secs - since_beat)
        } else {
            None
        };

        Some(BeatPulse {
            index: self.beat_count,
            fired,
            bpm: self.tempo.bpm(),
        })
    }

    /// Whether a beat window is currently open
    pub fn is_on_beat(&self) -> bool {
        self.window_remaining.is_some()
    }

    /// Time left in the open window, if any
    pub fn window_remaining(&self) -> Option<f64> {
        self.window_remaining
    }

    pub fn window_secs(&self) -> f64 {
        self.window_secs
    }

    pub fn bpm(&self) -> f64 {
        self.tempo.bpm()
    }

    pub fn interval_secs(&self) -> f64 {
        self.tempo.interval_secs()
    }

    pub fn beat_count(&self) -> u64 {
        self.beat_count
    }

    /// Progress through the current beat, in [0, 1]
    pub fn phase(&self) -> f64 {
        (self.accumulator / self.tempo.interval_secs()).clamp(0.0, 1.0)
    }

    /// Playback rate for background audio, linear in tempo between the
    /// configured rates at the range floor and ceiling
    pub fn playback_rate(&self) -> f64 {
        let t = self.range.fraction(self.tempo.bpm());
        self.config.min_playback_rate
            + (self.config.max_playback_rate - self.config.min_playback_rate) * t
    }

    pub fn config(&self) -> &BeatClockConfig {
        &self.config
    }

    /// Restart the beat grid at the initial tempo
    pub fn reset(&mut self) {
        self.tempo = Tempo::new(self.config.initial_bpm, &self.range);
        self.accumulator = 0.0;
        self.window_remaining = None;
        self.beat_count = 0;
    }
}

impl TempoControl for BeatClock {
    fn tempo(&self) -> Tempo {
        self.tempo
    }

    fn tempo_range(&self) -> TempoRange {
        self.range
    }

    fn set_tempo(&mut self, bpm: f64) -> Tempo {
        if !bpm.is_finite() {
            warn!(bpm, "ignoring non-finite tempo request");
            return self.tempo;
        }

        let previous = self.tempo;
        self.tempo = Tempo::new(bpm, &self.range);
        if self.tempo != previous {
            debug!(from = previous.bpm(), to = self.tempo.bpm(), "tempo updated");
        }
        self.tempo
    }
}

impl Default for BeatClock {
    fn default() -> Self {
        Self::new(BeatClockConfig::default())
    }
}
