//! Error types for the CalmBeat system.
//!
//! The per-frame path never fails: out-of-range input is clamped or the
//! frame is skipped. These errors surface when validating configuration
//! or a raw pose, and when serializing snapshots.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
