//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Call once at startup before anything is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names. The engine crate records the pool, scheduler, and stream
// metrics under the same names.

/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Outbound messages dropped because a client was slow (counter).
pub const WS_MESSAGES_DROPPED_TOTAL: &str = "ws_messages_dropped_total";
/// Client messages rejected as malformed (counter).
pub const WS_MALFORMED_MESSAGES_TOTAL: &str = "ws_malformed_messages_total";
/// Finished jobs (counter, labels: family, outcome).
pub const ANALYSIS_JOBS_TOTAL: &str = "analysis_jobs_total";
/// Leased engines (gauge, labels: family).
pub const ENGINE_SLOTS_BUSY: &str = "engine_slots_busy";
/// Engine restarts (counter, labels: family).
pub const ENGINE_RESTARTS_TOTAL: &str = "engine_restarts_total";
/// Requests waiting for an engine (gauge, labels: family).
pub const SCHEDULER_QUEUE_DEPTH: &str = "scheduler_queue_depth";
/// Progress updates dropped for slow clients (counter).
pub const STREAM_UPDATES_DROPPED_TOTAL: &str = "stream_updates_dropped_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_names_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_MESSAGES_DROPPED_TOTAL,
            WS_MALFORMED_MESSAGES_TOTAL,
            ANALYSIS_JOBS_TOTAL,
            ENGINE_SLOTS_BUSY,
            ENGINE_RESTARTS_TOTAL,
            SCHEDULER_QUEUE_DEPTH,
            STREAM_UPDATES_DROPPED_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
