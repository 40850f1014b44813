//! Analysis requests.

use std::time::Duration;

use crate::errors::AnalysisError;
use crate::family::EngineFamily;
use crate::fen::Position;

/// How long the engine should search.
///
/// When a client supplies several limits, `infinite` wins over `movetime`,
/// which wins over `depth`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchLimit {
    /// Search until told to stop.
    Infinite,
    /// Search for a fixed wall-clock time.
    MoveTime(Duration),
    /// Search to a fixed depth in plies.
    Depth(u32),
}

impl SearchLimit {
    /// Pick the effective limit from the optional client fields, falling back
    /// to `default_depth` when none is given.
    pub fn resolve(
        depth: Option<u32>,
        movetime_ms: Option<u64>,
        infinite: bool,
        default_depth: u32,
    ) -> Result<Self, AnalysisError> {
        if infinite {
            return Ok(Self::Infinite);
        }
        if let Some(ms) = movetime_ms {
            if ms == 0 {
                return Err(AnalysisError::MalformedMessage(
                    "movetime must be positive".to_string(),
                ));
            }
            return Ok(Self::MoveTime(Duration::from_millis(ms)));
        }
        match depth {
            Some(0) => Err(AnalysisError::MalformedMessage(
                "depth must be at least 1".to_string(),
            )),
            Some(d) => Ok(Self::Depth(d)),
            None => Ok(Self::Depth(default_depth.max(1))),
        }
    }

    /// Requested wall-clock budget, if any.
    pub fn movetime(self) -> Option<Duration> {
        match self {
            Self::MoveTime(d) => Some(d),
            _ => None,
        }
    }
}

/// An immutable, validated analysis request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalysisRequest {
    position: Position,
    family: EngineFamily,
    limit: SearchLimit,
    multipv: u32,
    stream: bool,
}

impl AnalysisRequest {
    /// Build a request. `multipv` must be at least 1.
    pub fn new(
        position: Position,
        family: EngineFamily,
        limit: SearchLimit,
        multipv: u32,
        stream: bool,
    ) -> Result<Self, AnalysisError> {
        if multipv == 0 {
            return Err(AnalysisError::MalformedMessage(
                "multiPV must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            position,
            family,
            limit,
            multipv,
            stream,
        })
    }

    /// Position to analyse.
    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Requested engine family.
    pub fn family(&self) -> EngineFamily {
        self.family
    }

    /// Effective search limit.
    pub fn limit(&self) -> SearchLimit {
        self.limit
    }

    /// Requested number of variations.
    pub fn multipv(&self) -> u32 {
        self.multipv
    }

    /// Whether intermediate updates should be streamed.
    pub fn stream(&self) -> bool {
        self.stream
    }

    /// Clamp the variation count to `max` (itself at least 1).
    #[must_use]
    pub fn with_max_multipv(mut self, max: u32) -> Self {
        self.multipv = self.multipv.min(max.max(1));
        self
    }
}
