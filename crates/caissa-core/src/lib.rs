//! # caissa-core
//!
//! Shared vocabulary for the caissa analysis service.
//!
//! Every other caissa crate depends on these types:
//!
//! - **Positions**: [`fen::Position`], a validated FEN string with its side to move
//! - **Requests**: [`request::AnalysisRequest`] and [`family::EngineFamily`]
//! - **Results**: [`score::Score`], [`update::AnalysisLine`], [`update::AnalysisUpdate`], [`update::AnalysisResult`]
//! - **Errors**: [`errors::AnalysisError`], the client-visible failure taxonomy
//! - **Backoff**: [`backoff::restart_delay`] for supervised restarts

#![deny(unsafe_code)]

pub mod backoff;
pub mod errors;
pub mod family;
pub mod fen;
pub mod ids;
pub mod request;
pub mod score;
pub mod update;

pub use errors::AnalysisError;
pub use family::EngineFamily;
pub use fen::{Color, FenError, Position};
pub use ids::{ConnectionId, JobId};
pub use request::{AnalysisRequest, SearchLimit};
pub use score::Score;
pub use update::{AnalysisLine, AnalysisResult, AnalysisUpdate};
