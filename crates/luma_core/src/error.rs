use crate::signal::SignalKind;
use crate::telemetry::RollupKind;
use thiserror::Error;

/// Rejection of a malformed signal event at ingestion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error("signal `{signal}` out of range [0, 10]: {value}")]
    InvalidSignalRange { signal: SignalKind, value: f32 },

    #[error("signal event is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Failures that abort an orchestration call.
///
/// An empty survivor list is not an error; it is reported on `Selection`.
#[derive(Debug, Error)]
pub enum LumaError {
    #[error(transparent)]
    InvalidSignal(#[from] SignalError),

    #[error("state computation failed: required rollup `{rollup}` {reason}")]
    StateComputation { rollup: RollupKind, reason: String },

    #[error("invalid strategy config: {0}")]
    InvalidConfig(String),

    #[error("selection cancelled before completion")]
    Cancelled,
}

impl LumaError {
    /// The rollup that caused a state computation failure, if any.
    pub fn failed_rollup(&self) -> Option<RollupKind> {
        match self {
            LumaError::StateComputation { rollup, .. } => Some(*rollup),
            _ => None,
        }
    }
}

pub type LumaResult<T> = Result<T, LumaError>;
