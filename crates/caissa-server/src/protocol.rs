//! JSON wire protocol.
//!
//! Inbound messages are tagged by `type`: `analyze`, `status`, `ping`.
//! Outbound messages are `analysis_update`, `analysis_result`, `status`,
//! `pong`, and `error`.

use std::collections::BTreeMap;

use caissa_core::{
    AnalysisError, AnalysisLine, AnalysisRequest, AnalysisResult, AnalysisUpdate, EngineFamily,
    Position, Score, SearchLimit,
};
use caissa_engine::{FamilyLoad, JobEvent, JobEventKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// A message from a client.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start analysing a position, replacing any running job.
    Analyze(AnalyzeParams),
    /// Report connection and engine status.
    Status,
    /// Liveness probe; the timestamp is echoed back.
    Ping {
        /// Opaque client timestamp.
        #[serde(default)]
        timestamp: Option<Value>,
    },
}

/// Fields of an `analyze` request as sent by the client.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AnalyzeParams {
    /// Position in FEN.
    #[serde(default)]
    pub fen: Option<String>,
    /// Engine name; `stockfish`, `leela` or `lc0`.
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Depth limit.
    #[serde(default)]
    pub depth: Option<u32>,
    /// Time limit in milliseconds.
    #[serde(default)]
    pub movetime: Option<u64>,
    /// Variation count.
    #[serde(default, rename = "multiPV", alias = "multipv")]
    pub multipv: Option<u32>,
    /// Send intermediate updates.
    #[serde(default)]
    pub stream: bool,
    /// Search until stopped.
    #[serde(default)]
    pub infinite: bool,
}

fn default_engine() -> String {
    EngineFamily::Classical.wire_name().to_string()
}

impl AnalyzeParams {
    /// Validate into an [`AnalysisRequest`].
    pub fn into_request(self, default_depth: u32) -> Result<AnalysisRequest, AnalysisError> {
        let fen = self
            .fen
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| AnalysisError::MalformedMessage("fen is required".to_string()))?;
        let family = EngineFamily::from_name(&self.engine)
            .ok_or_else(|| AnalysisError::UnknownEngine(self.engine.clone()))?;
        let position = Position::parse(&fen)?;
        let limit = SearchLimit::resolve(self.depth, self.movetime, self.infinite, default_depth)?;
        AnalysisRequest::new(position, family, limit, self.multipv.unwrap_or(1), self.stream)
    }
}

/// Parse an inbound text frame.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, AnalysisError> {
    serde_json::from_str(text).map_err(|e| AnalysisError::MalformedMessage(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// A message to a client.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Intermediate search progress.
    AnalysisUpdate {
        /// Engine family name.
        engine: &'static str,
        /// Depth of the variation that changed.
        depth: u32,
        /// Principal variation score.
        evaluation: Option<Score>,
        /// Principal variation moves.
        pv: Vec<String>,
        /// First move of the principal variation.
        best_move: Option<String>,
        /// Nodes searched.
        #[serde(skip_serializing_if = "Option::is_none")]
        nodes: Option<u64>,
        /// Latest line of every variation.
        lines: Vec<AnalysisLine>,
    },
    /// Terminal result of a job.
    AnalysisResult {
        /// Engine family name.
        engine: &'static str,
        /// Analysed position.
        fen: String,
        /// Result body.
        result: ResultBody,
        /// Present and `true` when the search was stopped early.
        #[serde(skip_serializing_if = "is_false")]
        cancelled: bool,
    },
    /// Connection and engine status.
    Status {
        /// Open WebSocket connections.
        active_connections: usize,
        /// Whether each family can currently run analysis.
        engines: BTreeMap<&'static str, bool>,
        /// Per-family slot and queue detail.
        pools: BTreeMap<&'static str, PoolStatus>,
    },
    /// Reply to `ping`.
    Pong {
        /// Client timestamp, or server time in milliseconds when none was sent.
        timestamp: Value,
    },
    /// A request failed or was rejected.
    Error {
        /// Human-readable reason.
        message: String,
        /// Stable machine-readable code.
        code: &'static str,
    },
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// `result` object of `analysis_result`.
#[derive(Clone, Debug, Serialize)]
pub struct ResultBody {
    /// Chosen move; `null` when the position has no legal moves.
    pub best_move: Option<String>,
    /// Expected reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ponder: Option<String>,
    /// Principal variation score.
    pub evaluation: Option<Score>,
    /// Principal variation depth.
    pub depth: u32,
    /// Nodes searched.
    pub nodes: u64,
    /// Principal variation moves.
    pub pv: Vec<String>,
    /// Every variation, when more than one was searched.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub multipv: Vec<MultiPvLine>,
}

/// One entry of `result.multipv`.
#[derive(Clone, Debug, Serialize)]
pub struct MultiPvLine {
    /// Variation index.
    pub multipv: u32,
    /// First move of the variation.
    #[serde(rename = "move")]
    pub first_move: Option<String>,
    /// Variation score.
    pub evaluation: Score,
    /// Variation moves.
    pub pv: Vec<String>,
    /// Variation depth.
    pub depth: u32,
}

/// Per-family entry of `status.pools`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Idle engines.
    pub ready: usize,
    /// Engines running jobs.
    pub busy: usize,
    /// Requests waiting for an engine.
    pub queued: usize,
    /// Configured engine count.
    pub ceiling: usize,
    /// Engines starting or restarting.
    pub recovering: usize,
    /// Why the family is unavailable, if it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

impl ResultBody {
    fn new(result: AnalysisResult) -> Self {
        let multipv = if result.lines.len() > 1 {
            result
                .lines
                .iter()
                .map(|line| MultiPvLine {
                    multipv: line.multipv,
                    first_move: line.pv.first().cloned(),
                    evaluation: line.score,
                    pv: line.pv.clone(),
                    depth: line.depth,
                })
                .collect()
        } else {
            Vec::new()
        };
        Self {
            evaluation: result.score(),
            depth: result.depth(),
            nodes: result.nodes(),
            pv: result.pv(),
            multipv,
            best_move: result.best_move,
            ponder: result.ponder,
        }
    }
}

impl ServerMessage {
    /// Wire message for a job event.
    pub fn from_event(event: JobEvent) -> Self {
        let engine = event.family.wire_name();
        match event.kind {
            JobEventKind::Update(update) => Self::update(engine, update),
            JobEventKind::Finished { result, cancelled } => Self::AnalysisResult {
                engine,
                fen: event.fen.to_string(),
                result: ResultBody::new(result),
                cancelled,
            },
            JobEventKind::Failed(error) => Self::error(&error),
        }
    }

    fn update(engine: &'static str, update: AnalysisUpdate) -> Self {
        let nodes = update.nodes();
        let principal = update.lines.first();
        Self::AnalysisUpdate {
            engine,
            depth: update.depth,
            evaluation: principal.map(|l| l.score),
            pv: principal.map(|l| l.pv.clone()).unwrap_or_default(),
            best_move: principal.and_then(|l| l.pv.first().cloned()),
            nodes,
            lines: update.lines,
        }
    }

    /// Error message for an analysis error.
    pub fn error(error: &AnalysisError) -> Self {
        Self::Error {
            message: error.to_string(),
            code: error.code(),
        }
    }

    /// Status message from live counters.
    pub fn status(active_connections: usize, load: &[FamilyLoad]) -> Self {
        let mut engines = BTreeMap::new();
        let mut pools = BTreeMap::new();
        for family in load {
            let name = family.pool.family.wire_name();
            let _ = engines.insert(name, family.pool.available());
            let _ = pools.insert(
                name,
                PoolStatus {
                    ready: family.pool.ready,
                    busy: family.pool.busy,
                    queued: family.queued,
                    ceiling: family.pool.ceiling,
                    recovering: family.pool.recovering,
                    degraded: family.pool.degraded.clone(),
                },
            );
        }
        Self::Status {
            active_connections,
            engines,
            pools,
        }
    }

    /// Reply to a ping.
    pub fn pong(timestamp: Option<Value>) -> Self {
        Self::Pong {
            timestamp: timestamp
                .unwrap_or_else(|| Value::from(chrono::Utc::now().timestamp_millis())),
        }
    }

    /// Whether this message ends a job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AnalysisResult { .. } | Self::Error { .. })
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            error!(error = %e, "failed to serialize server message");
            String::new()
        })
    }
}
