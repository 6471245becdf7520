//! # CalmBeat-Engine
//!
//! The real-time core of a calming, movement-driven rhythm experience.
//!
//! ## Frame Loop
//!
//! A host supplies one pose and one elapsed-time delta per frame:
//!
//! 1. **Beat clock** - ticks at an adaptive tempo and opens a short on-time
//!    window after each beat
//! 2. **Motion** - linear and angular speed, a combined intensity score and
//!    a ring of recent movement directions
//! 3. **Overwhelm** - Calm ⇄ Overwhelmed with separate onset and recovery
//!    timers, under a policy chosen per deployment
//! 4. **Progress** - on-beat hits build toward sections and gently raise
//!    the tempo; idling lets engagement and tempo relax
//!
//! While the player is overwhelmed, movement is not judged at all.
//!
//! Every timer is an accumulator advanced by the frame delta; nothing here
//! spawns tasks or blocks.
//!
//! ## Usage
//!
//! ```no_run
//! use calmbeat_core::{MotionSample, Position3D};
//! use calmbeat_engine::{BiofeedbackSession, SessionConfig};
//!
//! let mut session = BiofeedbackSession::new(SessionConfig::default());
//! let mut events = session.channel(64);
//!
//! let sample = MotionSample::at(Position3D::new(0.0, 1.2, 0.0));
//! let report = session.process_frame(&sample, 1.0 / 60.0);
//! if let Some(judgement) = report.judgement {
//!     println!("{:?}", judgement);
//! }
//! while let Ok(event) = events.try_recv() {
//!     println!("{:?}", event);
//! }
//! ```

pub mod beat_clock;
pub mod config;
pub mod events;
pub mod motion;
pub mod overwhelm;
pub mod progress;
pub mod session;

pub use beat_clock::*;
pub use config::*;
pub use events::*;
pub use motion::*;
pub use overwhelm::*;
pub use progress::*;
pub use session::*;
