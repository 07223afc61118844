//! Ragroute Core Library
//!
//! This crate provides the core functionality for ragroute, an adaptive
//! request router for retrieval agents:
//! - Keyword classification of incoming questions
//! - UCB1 bandit routing over (category, handler) arms with priors
//! - Persisted routing statistics that survive restarts
//! - Append-only interaction ledger for late feedback
//! - Orchestration of routing, handler calls and feedback
//! - Offline analysis of the ledger

pub mod analyzer;
pub mod config;
pub mod error;
pub mod handlers;
pub mod orchestrator;
pub mod routing;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::handlers::{Handler, HandlerOutput, HandlerRegistry};
    pub use crate::orchestrator::{Orchestrator, RoutingResult};
    pub use crate::routing::{Category, Router};
}
