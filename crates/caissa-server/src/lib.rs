//! # caissa-server
//!
//! Axum HTTP + `WebSocket` gateway for the analysis service.
//!
//! - `GET /ws`: the JSON analysis protocol (`analyze`, `status`, `ping`)
//! - `GET /health`: liveness with uptime, connections, and engine availability
//! - `GET /metrics`: Prometheus text
//! - One active job per connection; a new `analyze` supersedes the old one
//! - Disconnect cancels the connection's job; graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{AppState, CaissaServer};
pub use shutdown::ShutdownCoordinator;
