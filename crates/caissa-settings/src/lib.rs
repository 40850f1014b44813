//! # caissa-settings
//!
//! Configuration for the caissa analysis service.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`CaissaSettings::default()`]
//! 2. **User file**: `~/.caissa/settings.json` or `$CAISSA_SETTINGS` (deep-merged over defaults)
//! 3. **Environment variables**: `CAISSA_*` overrides (highest priority)
//!
//! Command-line flags on the binary are applied on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = CaissaSettings::default();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8765);
        assert_eq!(settings.engines.stockfish.ceiling, 3);
        assert_eq!(settings.engines.leela.ceiling, 1);
        assert_eq!(settings.scheduler.max_wait_ms, 30_000);
        assert_eq!(settings.supervisor.restart_max_ms, 30_000);
        assert_eq!(settings.session.default_depth, 20);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn deep_merge_re_exported() {
        let merged = deep_merge(serde_json::json!({"x": 1}), serde_json::json!({"y": 2}));
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }
}
