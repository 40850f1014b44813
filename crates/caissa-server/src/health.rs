//! `/health` endpoint body.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` when at least one family can analyse, otherwise `"degraded"`.
    pub status: &'static str,
    /// When the server started.
    pub started_at: DateTime<Utc>,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Whether each family can currently analyse.
    pub engines: BTreeMap<&'static str, bool>,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    started_at: DateTime<Utc>,
    connections: usize,
    engines: BTreeMap<&'static str, bool>,
) -> HealthResponse {
    let status = if engines.values().any(|up| *up) {
        "ok"
    } else {
        "degraded"
    };
    HealthResponse {
        status,
        started_at,
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        engines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engines(stockfish: bool, leela: bool) -> BTreeMap<&'static str, bool> {
        BTreeMap::from([("stockfish", stockfish), ("leela", leela)])
    }

    #[test]
    fn ok_with_one_family_up() {
        let resp = health_check(Instant::now(), Utc::now(), 0, engines(true, false));
        assert_eq!(resp.status, "ok");
    }

    #[test]
    fn degraded_with_no_family_up() {
        let resp = health_check(Instant::now(), Utc::now(), 0, engines(false, false));
        assert_eq!(resp.status, "degraded");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, Utc::now(), 0, engines(true, true));
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), Utc::now(), 2, engines(true, false));
        let parsed: serde_json::Value = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 2);
        assert_eq!(parsed["engines"]["leela"], false);
        assert!(parsed["started_at"].is_string());
        assert!(parsed["uptime_secs"].is_number());
    }
}
