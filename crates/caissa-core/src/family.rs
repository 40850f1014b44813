//! Engine families.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A class of analysis engine sharing one command dialect and one
/// concurrency ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EngineFamily {
    /// Alpha-beta search engine (Stockfish).
    #[serde(rename = "stockfish")]
    Classical,
    /// Neural-network evaluation engine (Leela Chess Zero).
    #[serde(rename = "leela")]
    Neural,
}

impl EngineFamily {
    /// Every family, in status-report order.
    pub const ALL: [Self; 2] = [Self::Classical, Self::Neural];

    /// Resolve a client-supplied engine name. Case-insensitive; `lc0` is an
    /// alias for `leela`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "stockfish" => Some(Self::Classical),
            "leela" | "lc0" => Some(Self::Neural),
            _ => None,
        }
    }

    /// Name used on the wire and in status reports.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Classical => "stockfish",
            Self::Neural => "leela",
        }
    }
}

impl fmt::Display for EngineFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}
