//! Client-visible failure taxonomy.
//!
//! Every variant is recoverable at the connection or job boundary. The
//! [`AnalysisError::code`] string is stable and is sent alongside the human
//! message so clients can branch on it.

use thiserror::Error;

use crate::family::EngineFamily;
use crate::fen::FenError;

/// Why an analysis request was rejected or a job failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// The FEN string is malformed.
    #[error("invalid position: {0}")]
    InvalidPosition(#[from] FenError),

    /// The requested engine name is not a known family.
    #[error("unknown engine '{0}'")]
    UnknownEngine(String),

    /// No slot is free and the wait queue is full, or the family is degraded.
    #[error("{family} is unavailable: {reason}")]
    EngineUnavailable {
        /// Requested family.
        family: EngineFamily,
        /// Why no slot could be reserved.
        reason: String,
    },

    /// The request waited in the queue longer than allowed.
    #[error("timed out after {waited_ms}ms waiting for a {family} engine")]
    QueueTimeout {
        /// Requested family.
        family: EngineFamily,
        /// How long the request waited.
        waited_ms: u64,
    },

    /// The engine process died or its pipes failed mid-job.
    #[error("{family} engine crashed: {detail}")]
    EngineCrashed {
        /// Family of the crashed engine.
        family: EngineFamily,
        /// What was observed.
        detail: String,
    },

    /// The engine produced no output for too long.
    #[error("{family} engine produced no output for {idle_ms}ms")]
    Timeout {
        /// Family of the wedged engine.
        family: EngineFamily,
        /// Idle interval that elapsed.
        idle_ms: u64,
    },

    /// The client message could not be parsed or carried bad parameters.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The job was cancelled before the engine reported anything.
    #[error("analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPosition(_) => "INVALID_POSITION",
            Self::UnknownEngine(_) => "UNKNOWN_ENGINE",
            Self::EngineUnavailable { .. } => "ENGINE_UNAVAILABLE",
            Self::QueueTimeout { .. } => "QUEUE_TIMEOUT",
            Self::EngineCrashed { .. } => "ENGINE_CRASHED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::MalformedMessage(_) => "MALFORMED_MESSAGE",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether the error was raised before any job was created.
    pub fn is_admission_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPosition(_)
                | Self::UnknownEngine(_)
                | Self::EngineUnavailable { .. }
                | Self::QueueTimeout { .. }
                | Self::MalformedMessage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(AnalysisError::UnknownEngine("x".into()).code(), "UNKNOWN_ENGINE");
        assert_eq!(
            AnalysisError::QueueTimeout {
                family: EngineFamily::Classical,
                waited_ms: 10
            }
            .code(),
            "QUEUE_TIMEOUT"
        );
        assert_eq!(AnalysisError::Cancelled.code(), "CANCELLED");
    }

    #[test]
    fn fen_error_converts() {
        let err: AnalysisError = FenError::KingCount.into();
        assert_eq!(err.code(), "INVALID_POSITION");
        assert_eq!(
            err.to_string(),
            "invalid position: each side must have exactly one king"
        );
    }

    #[test]
    fn display_includes_family() {
        let err = AnalysisError::Timeout {
            family: EngineFamily::Neural,
            idle_ms: 120_000,
        };
        assert_eq!(err.to_string(), "leela engine produced no output for 120000ms");
    }

    #[test]
    fn admission_errors_classified() {
        assert!(AnalysisError::MalformedMessage("x".into()).is_admission_error());
        assert!(
            !AnalysisError::EngineCrashed {
                family: EngineFamily::Classical,
                detail: "eof".into()
            }
            .is_admission_error()
        );
    }
}
