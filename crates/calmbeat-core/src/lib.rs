//! # CalmBeat-Core
//!
//! Core types for the CalmBeat movement biofeedback loop.
//!
//! A tracked device delivers one pose per frame. The engine crate turns the
//! stream of poses into motion intensity, an overwhelm classification and
//! on-beat judgements against an adaptive tempo. This crate holds the
//! vocabulary those stages share:
//!
//! - [`Position3D`], [`Velocity3D`] and [`Orientation3D`] for raw poses
//! - [`MotionSample`], the per-frame input
//! - [`Tempo`] and [`TempoRange`], the bounded beats-per-minute scalar
//! - [`Error`] and [`Result`] for the configuration boundary

pub mod error;
pub mod geometry;
pub mod types;

pub use error::{Error, Result};
pub use geometry::*;
pub use types::*;
