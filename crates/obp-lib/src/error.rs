use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Side of the envelope maximum a search ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flank {
    /// Between the pump-up side and MAP.
    Systolic,
    /// Between MAP and the deflated side.
    Diastolic,
}

impl std::fmt::Display for Flank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Flank::Systolic => write!(f, "systolic"),
            Flank::Diastolic => write!(f, "diastolic"),
        }
    }
}

/// Errors raised by the estimation pipeline. Every variant is terminal for
/// the invocation that produced it.
#[derive(Debug, Error)]
pub enum ObpError {
    #[error("malformed recording: {0}")]
    Format(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("envelope never crosses the {flank} threshold")]
    RatioCrossingNotFound { flank: Flank },
    #[error("calibration failed: {0}")]
    Calibration(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ObpError>;
