//! `CaissaServer`: axum HTTP and WebSocket gateway.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use caissa_core::ConnectionId;
use caissa_engine::AnalysisService;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::run_ws_session;

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Job runner.
    pub service: Arc<AnalysisService>,
    /// Connected clients.
    pub registry: Arc<ConnectionRegistry>,
    /// Gateway configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown signal.
    pub shutdown: ShutdownCoordinator,
    /// Monotonic start time.
    pub start_time: Instant,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The analysis gateway.
pub struct CaissaServer {
    state: AppState,
}

impl CaissaServer {
    /// Create a server in front of `service`.
    pub fn new(
        config: ServerConfig,
        service: Arc<AnalysisService>,
        shutdown: ShutdownCoordinator,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            state: AppState {
                service,
                registry: Arc::new(ConnectionRegistry::new()),
                config: Arc::new(config),
                shutdown,
                start_time: Instant::now(),
                started_at: Utc::now(),
                metrics,
            },
        }
    }

    /// Build the router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve in the background until shutdown is signalled.
    ///
    /// Returns the bound address (useful with port `0`) and the server task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(self.state.config.bind_address()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();
        info!(%addr, "caissa server listening");

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server stopped with error");
            }
        });
        Ok((addr, handle))
    }

    /// Connected clients.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.state.registry
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.state.shutdown
    }

    /// Gateway configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let limit = state.config.max_message_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| run_ws_session(socket, ConnectionId::new(), state))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let engines: BTreeMap<&'static str, bool> = state
        .service
        .load()
        .iter()
        .map(|family| (family.pool.family.wire_name(), family.pool.available()))
        .collect();
    Json(health::health_check(
        state.start_time,
        state.started_at,
        state.registry.count(),
        engines,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use caissa_engine::testutil::{FakeBehavior, FakeLauncher, LaunchFailure, fast_pool_config};
    use caissa_engine::{AdmissionScheduler, EnginePool, ServiceConfig};
    use tower::ServiceExt;

    use super::*;

    async fn make_server(behavior: FakeBehavior, metrics: Option<PrometheusHandle>) -> CaissaServer {
        let shutdown = ShutdownCoordinator::new();
        let pool = EnginePool::start(
            FakeLauncher::new(behavior),
            fast_pool_config(1, 1),
            shutdown.token(),
        )
        .await;
        let scheduler = AdmissionScheduler::new(pool, 4, Duration::from_secs(1));
        let service = AnalysisService::new(
            scheduler,
            ServiceConfig {
                max_multipv: 5,
                throttle: Duration::ZERO,
                stop_grace: Duration::from_millis(200),
                sync_timeout: Duration::from_secs(1),
            },
        );
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        };
        CaissaServer::new(config, service, shutdown, metrics)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    #[tokio::test]
    async fn health_reports_engines() {
        let server = make_server(FakeBehavior::default(), None).await;
        let (status, body) = get_json(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["engines"]["stockfish"], true);
    }

    #[tokio::test]
    async fn health_degraded_without_engines() {
        let behavior = FakeBehavior {
            launch_failure: Some(LaunchFailure::Fatal),
            ..FakeBehavior::default()
        };
        let server = make_server(behavior, None).await;
        let (_, body) = get_json(server.router(), "/health").await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["engines"]["leela"], false);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_unavailable() {
        let server = make_server(FakeBehavior::default(), None).await;
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_with_handle_renders() {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let server = make_server(FakeBehavior::default(), Some(handle)).await;
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn plain_get_on_ws_is_rejected() {
        let server = make_server(FakeBehavior::default(), None).await;
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server(FakeBehavior::default(), None).await;
        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_and_stops_on_shutdown() {
        let server = make_server(FakeBehavior::default(), None).await;
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
