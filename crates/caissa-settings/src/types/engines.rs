//! Engine binaries, tuning options, and pool sizes.

use std::collections::BTreeMap;

use caissa_core::EngineFamily;
use serde::{Deserialize, Serialize};

/// Settings for both engine families.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnginesSettings {
    /// Directory searched for engine binaries when no explicit path is set.
    pub dir: String,
    /// Classical family (Stockfish).
    pub stockfish: EngineSettings,
    /// Neural family (Leela Chess Zero).
    pub leela: EngineSettings,
}

impl EnginesSettings {
    /// Settings for `family`.
    pub fn for_family(&self, family: EngineFamily) -> &EngineSettings {
        match family {
            EngineFamily::Classical => &self.stockfish,
            EngineFamily::Neural => &self.leela,
        }
    }
}

impl Default for EnginesSettings {
    fn default() -> Self {
        Self {
            dir: "engines".to_string(),
            stockfish: EngineSettings::stockfish(),
            leela: EngineSettings::leela(),
        }
    }
}

/// One engine family's process and pool settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Start this family at all.
    pub enabled: bool,
    /// Explicit binary path; discovered under `engines.dir` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Extra command-line arguments.
    pub args: Vec<String>,
    /// Network weights file (neural family only); discovered when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<String>,
    /// Number of engine processes, and so the concurrency ceiling.
    pub ceiling: usize,
    /// `setoption` values sent once after the handshake.
    pub options: BTreeMap<String, String>,
    /// Time allowed for `uci`/`uciok` and `isready`/`readyok` at startup.
    pub handshake_timeout_ms: u64,
    /// Fail a job when the engine is silent this long (requested movetime is added).
    pub idle_timeout_ms: u64,
}

impl EngineSettings {
    fn stockfish() -> Self {
        Self {
            enabled: true,
            path: None,
            args: Vec::new(),
            weights: None,
            ceiling: 3,
            options: options(&[
                ("Hash", "256"),
                ("Threads", "2"),
                ("Ponder", "false"),
                ("UCI_AnalyseMode", "true"),
            ]),
            handshake_timeout_ms: 10_000,
            idle_timeout_ms: 60_000,
        }
    }

    fn leela() -> Self {
        Self {
            enabled: true,
            path: None,
            args: Vec::new(),
            weights: None,
            ceiling: 1,
            options: options(&[
                ("Threads", "4"),
                ("NNCacheSize", "2000000"),
                ("MinibatchSize", "256"),
                ("MaxPrefetch", "32"),
                ("SmartPruningFactor", "0.0"),
                ("VerboseMoveStats", "true"),
            ]),
            handshake_timeout_ms: 30_000,
            idle_timeout_ms: 120_000,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::stockfish()
    }
}

fn options(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_lookup() {
        let engines = EnginesSettings::default();
        assert_eq!(engines.for_family(EngineFamily::Classical).ceiling, 3);
        assert_eq!(engines.for_family(EngineFamily::Neural).ceiling, 1);
    }

    #[test]
    fn stockfish_options() {
        let engines = EnginesSettings::default();
        assert_eq!(engines.stockfish.options["UCI_AnalyseMode"], "true");
        assert!(!engines.stockfish.options.contains_key("MultiPV"));
    }

    #[test]
    fn leela_has_longer_timeouts() {
        let engines = EnginesSettings::default();
        assert!(engines.leela.idle_timeout_ms > engines.stockfish.idle_timeout_ms);
        assert_eq!(engines.leela.options["SmartPruningFactor"], "0.0");
    }

    #[test]
    fn options_replaced_not_merged_by_serde() {
        let engines: EnginesSettings =
            serde_json::from_str(r#"{"stockfish": {"options": {"Threads": "1"}}}"#).unwrap();
        assert_eq!(engines.stockfish.options.len(), 1);
        assert_eq!(engines.leela.ceiling, 1);
    }
}
