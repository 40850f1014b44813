//! Engine process errors.

use std::io;

use caissa_core::EngineFamily;
use thiserror::Error;

/// Why an engine binary could not be resolved at all.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// The family is switched off in settings.
    #[error("{0} is disabled")]
    Disabled(EngineFamily),
    /// No binary at the configured path or in the engines directory.
    #[error("no {family} binary found (searched: {searched})")]
    BinaryNotFound {
        /// Family being resolved.
        family: EngineFamily,
        /// Paths that were checked.
        searched: String,
    },
    /// The neural engine needs a weights file and none was found.
    #[error("no network weights found (searched: {searched})")]
    WeightsNotFound {
        /// Paths that were checked.
        searched: String,
    },
}

/// Errors raised while launching or talking to an engine process.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Discovery failed; the family cannot run.
    #[error(transparent)]
    Unavailable(#[from] DiscoveryError),

    /// The process could not be spawned.
    #[error("failed to launch {program}: {source}")]
    Launch {
        /// Program that was spawned.
        program: String,
        /// Underlying spawn error.
        #[source]
        source: io::Error,
    },

    /// The engine closed its standard output.
    #[error("engine closed its output")]
    Closed,

    /// Reading or writing the engine pipes failed.
    #[error("engine I/O failed: {0}")]
    Io(#[from] io::Error),

    /// The engine did not answer in time.
    #[error("timed out after {timeout_ms}ms waiting for {waiting_for}")]
    Timeout {
        /// The token that was expected.
        waiting_for: &'static str,
        /// Time allowed.
        timeout_ms: u64,
    },
}

impl EngineError {
    /// Whether retrying the launch is pointless. Fatal errors leave the family
    /// permanently degraded.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Launch { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            Self::Closed | Self::Io(_) | Self::Timeout { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_errors_are_fatal() {
        let err: EngineError = DiscoveryError::WeightsNotFound {
            searched: "engines/net.pb".into(),
        }
        .into();
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "no network weights found (searched: engines/net.pb)"
        );
    }

    #[test]
    fn missing_binary_launch_is_fatal() {
        let err = EngineError::Launch {
            program: "/nope/stockfish".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn transient_errors_are_not_fatal() {
        assert!(!EngineError::Closed.is_fatal());
        assert!(
            !EngineError::Timeout {
                waiting_for: "uciok",
                timeout_ms: 100
            }
            .is_fatal()
        );
        let err = EngineError::Launch {
            program: "stockfish".into(),
            source: io::Error::other("resource busy"),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn timeout_display() {
        let err = EngineError::Timeout {
            waiting_for: "readyok",
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "timed out after 250ms waiting for readyok");
    }
}
