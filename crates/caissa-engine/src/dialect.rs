//! Per-family command dialects.
//!
//! Both families speak UCI but differ in what they support: the neural
//! engine has no meaningful depth limit, so depth is translated into a node
//! budget, and its variations are not requested.

use caissa_core::{EngineFamily, SearchLimit};

/// Nodes per requested ply for the neural engine.
pub const NODES_PER_PLY: u64 = 800;

/// How one engine family expresses search requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dialect {
    family: EngineFamily,
}

impl Dialect {
    /// Dialect for `family`.
    pub fn for_family(family: EngineFamily) -> Self {
        Self { family }
    }

    /// Whether the family honours `MultiPV`.
    pub fn supports_multipv(self) -> bool {
        self.family == EngineFamily::Classical
    }

    /// Clamp a requested variation count to what the family supports.
    pub fn effective_multipv(self, requested: u32) -> u32 {
        if self.supports_multipv() {
            requested.max(1)
        } else {
            1
        }
    }

    /// Commands sent before `position`, resetting per-job state.
    pub fn setup_commands(self, multipv: u32) -> Vec<String> {
        let mut commands = vec!["ucinewgame".to_string()];
        if self.supports_multipv() {
            commands.push(format!(
                "setoption name MultiPV value {}",
                self.effective_multipv(multipv)
            ));
        }
        commands
    }

    /// `position` command for a FEN.
    pub fn position_command(self, fen: &str) -> String {
        format!("position fen {fen}")
    }

    /// `go` command for a search limit.
    pub fn go_command(self, limit: SearchLimit) -> String {
        match limit {
            SearchLimit::Infinite => "go infinite".to_string(),
            SearchLimit::MoveTime(duration) => format!("go movetime {}", duration.as_millis()),
            SearchLimit::Depth(depth) => match self.family {
                EngineFamily::Classical => format!("go depth {depth}"),
                EngineFamily::Neural => {
                    format!("go nodes {}", u64::from(depth).saturating_mul(NODES_PER_PLY))
                }
            },
        }
    }

    /// Command that ends a running search.
    pub fn stop_command(self) -> &'static str {
        "stop"
    }
}
