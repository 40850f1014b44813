//! WebSocket connection management, message dispatch, and job streaming.

pub mod connection;
pub mod handler;
pub mod registry;
pub mod session;
