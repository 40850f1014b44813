//! Structured search observations and final results.

use serde::Serialize;

use crate::score::Score;

/// One variation as last reported by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AnalysisLine {
    /// Variation index, 1-based.
    pub multipv: u32,
    /// Nominal search depth.
    pub depth: u32,
    /// Selective search depth.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seldepth: Option<u32>,
    /// White-positive evaluation.
    #[serde(rename = "evaluation")]
    pub score: Score,
    /// Principal variation in UCI long algebraic notation.
    pub pv: Vec<String>,
    /// Nodes searched so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u64>,
    /// Nodes per second.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nps: Option<u64>,
    /// Search time in milliseconds.
    #[serde(rename = "time", skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u64>,
}

/// An incremental observation: the variation that changed plus a snapshot of
/// every variation's latest line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalysisUpdate {
    /// Variation index that changed.
    pub multipv: u32,
    /// Depth reached by the changed variation.
    pub depth: u32,
    /// Latest line per variation, sorted by index.
    pub lines: Vec<AnalysisLine>,
}

impl AnalysisUpdate {
    /// Largest node count reported across the snapshot.
    pub fn nodes(&self) -> Option<u64> {
        self.lines.iter().filter_map(|l| l.nodes).max()
    }
}

/// The terminal outcome of a job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalysisResult {
    /// Engine's chosen move, `None` when it reported `(none)`.
    pub best_move: Option<String>,
    /// Suggested reply to the best move.
    pub ponder: Option<String>,
    /// Latest line per variation, sorted by index.
    pub lines: Vec<AnalysisLine>,
}

impl AnalysisResult {
    /// Build a result, ordering `lines` by variation index.
    pub fn new(
        best_move: Option<String>,
        ponder: Option<String>,
        mut lines: Vec<AnalysisLine>,
    ) -> Self {
        lines.sort_by_key(|l| l.multipv);
        Self {
            best_move,
            ponder,
            lines,
        }
    }

    /// The first variation, if the engine reported any.
    pub fn principal(&self) -> Option<&AnalysisLine> {
        self.lines.first()
    }

    /// Evaluation of the principal variation.
    pub fn score(&self) -> Option<Score> {
        self.principal().map(|l| l.score)
    }

    /// Depth of the principal variation, 0 if none.
    pub fn depth(&self) -> u32 {
        self.principal().map_or(0, |l| l.depth)
    }

    /// Largest node count reported across variations.
    pub fn nodes(&self) -> u64 {
        self.lines.iter().filter_map(|l| l.nodes).max().unwrap_or(0)
    }

    /// Principal variation moves, or just the best move when no line was seen.
    pub fn pv(&self) -> Vec<String> {
        match self.principal() {
            Some(line) => line.pv.clone(),
            None => self.best_move.iter().cloned().collect(),
        }
    }

    /// Whether the engine produced anything worth reporting.
    pub fn is_empty(&self) -> bool {
        self.best_move.is_none() && self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(multipv: u32, depth: u32, cp: i32, nodes: u64) -> AnalysisLine {
        AnalysisLine {
            multipv,
            depth,
            seldepth: None,
            score: Score::Centipawns(cp),
            pv: vec!["e2e4".into(), "e7e5".into()],
            nodes: Some(nodes),
            nps: None,
            time_ms: None,
        }
    }

    #[test]
    fn result_sorts_lines() {
        let result = AnalysisResult::new(
            Some("e2e4".into()),
            None,
            vec![line(2, 10, 10, 500), line(1, 10, 30, 900)],
        );
        assert_eq!(result.lines[0].multipv, 1);
        assert_eq!(result.score(), Some(Score::Centipawns(30)));
        assert_eq!(result.depth(), 10);
        assert_eq!(result.nodes(), 900);
    }

    #[test]
    fn pv_falls_back_to_best_move() {
        let result = AnalysisResult::new(Some("g1f3".into()), None, vec![]);
        assert_eq!(result.pv(), vec!["g1f3".to_string()]);
        assert_eq!(result.depth(), 0);
        assert!(!result.is_empty());
    }

    #[test]
    fn empty_result() {
        let result = AnalysisResult::new(None, None, vec![]);
        assert!(result.is_empty());
        assert_eq!(result.score(), None);
    }

    #[test]
    fn update_nodes_is_max() {
        let update = AnalysisUpdate {
            multipv: 2,
            depth: 9,
            lines: vec![line(1, 10, 5, 700), line(2, 9, 0, 300)],
        };
        assert_eq!(update.nodes(), Some(700));
    }

    #[test]
    fn line_serializes_with_wire_names() {
        let json = serde_json::to_value(line(1, 12, -45, 1000)).unwrap();
        assert_eq!(json["multipv"], 1);
        assert_eq!(json["depth"], 12);
        assert_eq!(json["evaluation"], serde_json::json!(-0.45));
        assert_eq!(json["pv"], serde_json::json!(["e2e4", "e7e5"]));
        assert_eq!(json["nodes"], 1000);
        assert!(json.get("nps").is_none());
    }
}
