//! Handler trait and common types for retrieval strategies

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Output of a handler run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerOutput {
    /// Generated answer text
    pub answer: String,
    /// Number of retrieved sources the answer was grounded on
    pub source_count: usize,
    /// Strategy-specific extras (sources, scores, prompts)
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl HandlerOutput {
    /// Create an output with an answer and no sources
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            source_count: 0,
            metadata: serde_json::Value::Null,
        }
    }

    /// Set the source count
    pub fn with_sources(mut self, count: usize) -> Self {
        self.source_count = count;
        self
    }

    /// Attach strategy-specific metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Public description of a registered handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerInfo {
    pub id: String,
    pub description: String,
}

/// An interchangeable retrieval strategy
///
/// Implementations live outside this crate. The router and orchestrator
/// only ever see this trait and never branch on the concrete type.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Unique identifier, also the handler half of every arm
    fn id(&self) -> &str;

    /// One-line description for listings
    fn description(&self) -> &str {
        ""
    }

    /// Answer `question` using up to `top_k` retrieved sources
    async fn run(&self, question: &str, top_k: usize) -> Result<HandlerOutput>;

    fn info(&self) -> HandlerInfo {
        HandlerInfo {
            id: self.id().to_string(),
            description: self.description().to_string(),
        }
    }
}
