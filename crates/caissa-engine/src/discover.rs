//! Engine binary and weights discovery.
//!
//! An explicit `path` in settings wins. Otherwise the engines directory is
//! searched for the conventional binary names. The neural engine also needs a
//! weights file, passed as `--weights=<path>`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use caissa_core::EngineFamily;
use caissa_settings::EnginesSettings;
use tracing::{info, warn};

use crate::errors::DiscoveryError;
use crate::process::EngineCommand;

const WEIGHTS_CANDIDATES: [&str; 6] = [
    "weights/best_network.pb.gz",
    "weights/best_network.pb",
    "weights.pb.gz",
    "weights.pb",
    "net.pb.gz",
    "net.pb",
];

fn binary_names(family: EngineFamily) -> &'static [&'static str] {
    match family {
        EngineFamily::Classical if cfg!(windows) => &["stockfish.exe"],
        EngineFamily::Classical => &["stockfish"],
        EngineFamily::Neural if cfg!(windows) => &["lc0.exe"],
        EngineFamily::Neural => &["lc0"],
    }
}

/// Resolve the launch command for every family.
pub fn resolve_all(
    settings: &EnginesSettings,
) -> BTreeMap<EngineFamily, Result<EngineCommand, DiscoveryError>> {
    EngineFamily::ALL
        .into_iter()
        .map(|family| {
            let resolved = resolve_command(family, settings);
            match &resolved {
                Ok(command) => {
                    info!(%family, program = %command.program.display(), "engine resolved");
                }
                Err(err) => warn!(%family, error = %err, "engine unavailable"),
            }
            (family, resolved)
        })
        .collect()
}

/// Resolve the launch command for one family.
pub fn resolve_command(
    family: EngineFamily,
    settings: &EnginesSettings,
) -> Result<EngineCommand, DiscoveryError> {
    let engine = settings.for_family(family);
    if !engine.enabled {
        return Err(DiscoveryError::Disabled(family));
    }
    let dir = Path::new(&settings.dir);

    let program = match &engine.path {
        Some(path) => explicit_binary(family, path)?,
        None => find_first(dir, binary_names(family)).ok_or_else(|| {
            DiscoveryError::BinaryNotFound {
                family,
                searched: searched(dir, binary_names(family)),
            }
        })?,
    };

    let mut args = Vec::new();
    if family == EngineFamily::Neural {
        let weights = match &engine.weights {
            Some(path) if Path::new(path).is_file() => PathBuf::from(path),
            Some(path) => {
                return Err(DiscoveryError::WeightsNotFound {
                    searched: path.clone(),
                });
            }
            None => find_first(dir, &WEIGHTS_CANDIDATES).ok_or_else(|| {
                DiscoveryError::WeightsNotFound {
                    searched: searched(dir, &WEIGHTS_CANDIDATES),
                }
            })?,
        };
        args.push(format!("--weights={}", weights.display()));
    }
    args.extend(engine.args.iter().cloned());

    Ok(EngineCommand { program, args })
}

/// A bare command name is left for `PATH` lookup at spawn time; anything with
/// a directory component must exist.
fn explicit_binary(family: EngineFamily, path: &str) -> Result<PathBuf, DiscoveryError> {
    let candidate = PathBuf::from(path);
    let bare = candidate.components().count() == 1;
    if bare || candidate.is_file() {
        Ok(candidate)
    } else {
        Err(DiscoveryError::BinaryNotFound {
            family,
            searched: path.to_string(),
        })
    }
}

fn find_first(dir: &Path, names: &[&str]) -> Option<PathBuf> {
    names.iter().map(|name| dir.join(name)).find(|p| p.is_file())
}

fn searched(dir: &Path, names: &[&str]) -> String {
    names
        .iter()
        .map(|name| dir.join(name).display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn settings_in(dir: &Path) -> EnginesSettings {
        EnginesSettings {
            dir: dir.display().to_string(),
            ..EnginesSettings::default()
        }
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn finds_stockfish_in_engines_dir() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join(binary_names(EngineFamily::Classical)[0]);
        touch(&binary);

        let command = resolve_command(EngineFamily::Classical, &settings_in(dir.path())).unwrap();
        assert_eq!(command.program, binary);
        assert!(command.args.is_empty());
    }

    #[test]
    fn missing_stockfish_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_command(EngineFamily::Classical, &settings_in(dir.path())).unwrap_err();
        assert_matches!(err, DiscoveryError::BinaryNotFound { family: EngineFamily::Classical, .. });
    }

    #[test]
    fn leela_needs_weights() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join(binary_names(EngineFamily::Neural)[0]));

        let err = resolve_command(EngineFamily::Neural, &settings_in(dir.path())).unwrap_err();
        assert_matches!(err, DiscoveryError::WeightsNotFound { .. });
    }

    #[test]
    fn leela_weights_discovered_in_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join(binary_names(EngineFamily::Neural)[0]));
        touch(&dir.path().join("net.pb"));
        touch(&dir.path().join("weights/best_network.pb.gz"));

        let command = resolve_command(EngineFamily::Neural, &settings_in(dir.path())).unwrap();
        let expected = dir.path().join("weights/best_network.pb.gz");
        assert_eq!(command.args, vec![format!("--weights={}", expected.display())]);
    }

    #[test]
    fn explicit_path_and_args() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("custom-sf");
        touch(&binary);
        let mut settings = settings_in(dir.path());
        settings.stockfish.path = Some(binary.display().to_string());
        settings.stockfish.args = vec!["--bench-off".into()];

        let command = resolve_command(EngineFamily::Classical, &settings).unwrap();
        assert_eq!(command.program, binary);
        assert_eq!(command.args, vec!["--bench-off".to_string()]);
    }

    #[test]
    fn bare_name_left_to_path_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_in(dir.path());
        settings.stockfish.path = Some("stockfish".into());
        let command = resolve_command(EngineFamily::Classical, &settings).unwrap();
        assert_eq!(command.program, PathBuf::from("stockfish"));
    }

    #[test]
    fn disabled_family() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_in(dir.path());
        settings.leela.enabled = false;
        assert_eq!(
            resolve_command(EngineFamily::Neural, &settings),
            Err(DiscoveryError::Disabled(EngineFamily::Neural))
        );
        let all = resolve_all(&settings);
        assert_eq!(all.len(), 2);
    }
}
