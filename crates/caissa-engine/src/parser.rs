//! UCI output parsing.
//!
//! Only the tokens the service uses are extracted. Unknown tokens are skipped,
//! and `info string` lines are treated as opaque.

use caissa_core::{AnalysisLine, Color, Score};

/// Score bound qualifier on an `info` line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bound {
    /// Score is at least the reported value.
    Lower,
    /// Score is at most the reported value.
    Upper,
}

/// Fields of one `info` line. Scores are still relative to the side to move.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InfoLine {
    /// `depth`.
    pub depth: Option<u32>,
    /// `seldepth`.
    pub seldepth: Option<u32>,
    /// `multipv`, defaulting to 1 when converted.
    pub multipv: Option<u32>,
    /// `score cp`/`score mate`, side-to-move relative.
    pub score: Option<Score>,
    /// `lowerbound`/`upperbound`.
    pub bound: Option<Bound>,
    /// `nodes`.
    pub nodes: Option<u64>,
    /// `nps`.
    pub nps: Option<u64>,
    /// `time` in milliseconds.
    pub time_ms: Option<u64>,
    /// `pv` moves.
    pub pv: Vec<String>,
}

impl InfoLine {
    /// Convert into a white-positive [`AnalysisLine`].
    ///
    /// Lines without a depth or score (e.g. `currmove` reports) and bounded
    /// scores from aspiration re-searches yield `None`.
    pub fn to_line(&self, side_to_move: Color) -> Option<AnalysisLine> {
        if self.bound.is_some() {
            return None;
        }
        Some(AnalysisLine {
            multipv: self.multipv.unwrap_or(1).max(1),
            depth: self.depth?,
            seldepth: self.seldepth,
            score: self.score?.normalize(side_to_move),
            pv: self.pv.clone(),
            nodes: self.nodes,
            nps: self.nps,
            time_ms: self.time_ms,
        })
    }
}

/// A classified line of engine output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineOutput {
    /// `info ...` progress report.
    Info(InfoLine),
    /// `bestmove <move> [ponder <move>]`. `(none)` maps to `None`.
    BestMove {
        /// Chosen move.
        best: Option<String>,
        /// Expected reply.
        ponder: Option<String>,
    },
    /// `readyok`.
    ReadyOk,
    /// Anything else, including `info string`.
    Other,
}

/// Classify one line of engine output.
pub fn parse_line(line: &str) -> EngineOutput {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some("info") => parse_info(tokens).map_or(EngineOutput::Other, EngineOutput::Info),
        Some("bestmove") => {
            let best = tokens
                .next()
                .filter(|m| *m != "(none)" && *m != "0000")
                .map(str::to_string);
            let ponder = match tokens.next() {
                Some("ponder") => tokens.next().map(str::to_string),
                _ => None,
            };
            EngineOutput::BestMove { best, ponder }
        }
        Some("readyok") => EngineOutput::ReadyOk,
        _ => EngineOutput::Other,
    }
}

fn parse_info<'a>(mut tokens: impl Iterator<Item = &'a str>) -> Option<InfoLine> {
    let mut info = InfoLine::default();
    while let Some(token) = tokens.next() {
        match token {
            "string" => return None,
            "depth" => info.depth = tokens.next().and_then(|v| v.parse().ok()),
            "seldepth" => info.seldepth = tokens.next().and_then(|v| v.parse().ok()),
            "multipv" => info.multipv = tokens.next().and_then(|v| v.parse().ok()),
            "nodes" => info.nodes = tokens.next().and_then(|v| v.parse().ok()),
            "nps" => info.nps = tokens.next().and_then(|v| v.parse().ok()),
            "time" => info.time_ms = tokens.next().and_then(|v| v.parse().ok()),
            "score" => {
                info.score = match (tokens.next(), tokens.next().and_then(|v| v.parse().ok())) {
                    (Some("cp"), Some(v)) => Some(Score::Centipawns(v)),
                    (Some("mate"), Some(v)) => Some(Score::Mate(v)),
                    _ => None,
                };
            }
            "lowerbound" => info.bound = Some(Bound::Lower),
            "upperbound" => info.bound = Some(Bound::Upper),
            // pv runs to the end of the line
            "pv" => {
                info.pv = tokens.by_ref().map(str::to_string).collect();
            }
            _ => {}
        }
    }
    Some(info)
}
