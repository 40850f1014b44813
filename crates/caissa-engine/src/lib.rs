//! # caissa-engine
//!
//! Supervised UCI engines and the analysis job pipeline.
//!
//! - **Processes**: [`process::EngineIo`] line I/O, [`process::EngineLauncher`], UCI handshake
//! - **Discovery**: [`discover`] resolves binaries and network weights per family
//! - **Protocol**: [`parser`] reads engine output, [`dialect`] writes family-specific commands
//! - **Pool**: [`pool::EnginePool`] keeps `ceiling` engines per family alive and leases them out
//! - **Admission**: [`scheduler::AdmissionScheduler`] FIFO queues with capacity and wait limits
//! - **Sessions**: [`session::EngineSession`] runs one request on one engine
//! - **Streaming**: [`streamer::ResultStreamer`] throttles updates, drops them for slow clients
//! - **Jobs**: [`service::AnalysisService`] glues the above together per request

#![deny(unsafe_code)]

pub mod dialect;
pub mod discover;
pub mod errors;
pub mod parser;
pub mod pool;
pub mod process;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod streamer;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use errors::{DiscoveryError, EngineError};
pub use pool::{EngineHealth, EnginePool, FamilyStatus, PoolConfig};
pub use process::{EngineLauncher, ProcessLauncher};
pub use scheduler::AdmissionScheduler;
pub use service::{AnalysisService, FamilyLoad, JobHandle, ServiceConfig};
pub use streamer::{JobEvent, JobEventKind};
