//! Placeholder handlers that answer without retrieving anything
//!
//! Useful for exercising routing and feedback end to end (the CLI uses them)
//! when the real retrieval strategies are not wired in.

use async_trait::async_trait;
use serde_json::json;

use super::traits::{Handler, HandlerOutput};
use crate::error::Result;

/// Built-in handler ids with their descriptions
pub const DEFAULT_HANDLERS: &[(&str, &str)] = &[
    ("naive_rag", "Basic chunk-retrieve-generate baseline"),
    ("sentence_window_rag", "Embeds sentences and retrieves the surrounding window"),
    ("parent_child_rag", "Searches small child chunks, returns their parent documents"),
    ("agentic_rag", "Self-correcting retrieval with relevance grading and query rewriting"),
    ("multimodal_rag", "Retrieves over images and text together"),
    ("table_rag", "Answers analytical questions over structured tables"),
    ("graph_rag", "Answers entity and relationship questions from a knowledge graph"),
    ("hybrid_rag", "Dense plus BM25 retrieval with rank fusion"),
    ("hyde_rag", "Retrieves with a hypothetical answer to bridge vague queries"),
    ("corrective_rag", "Falls back to web search when local retrieval is weak"),
    ("lora_rag", "Generates with local LoRA adapters when available"),
];

/// Handler that reports where the question was routed instead of answering it
#[derive(Debug, Clone)]
pub struct DryRunHandler {
    id: String,
    description: String,
}

impl DryRunHandler {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// One dry-run handler per entry in [`DEFAULT_HANDLERS`]
    pub fn defaults() -> Vec<Self> {
        DEFAULT_HANDLERS
            .iter()
            .map(|(id, description)| Self::new(*id).with_description(*description))
            .collect()
    }
}

#[async_trait]
impl Handler for DryRunHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn run(&self, question: &str, top_k: usize) -> Result<HandlerOutput> {
        Ok(
            HandlerOutput::new(format!("[dry run] {} would answer: {}", self.id, question))
                .with_metadata(json!({ "dry_run": true, "top_k": top_k })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_echoes_question() {
        let handler = DryRunHandler::new("naive_rag");
        let output = handler.run("What is RAG?", 5).await.unwrap();
        assert!(output.answer.contains("naive_rag"));
        assert!(output.answer.contains("What is RAG?"));
        assert_eq!(output.source_count, 0);
        assert_eq!(output.metadata["top_k"], 5);
    }

    #[test]
    fn test_defaults_cover_every_builtin() {
        let handlers = DryRunHandler::defaults();
        assert_eq!(handlers.len(), DEFAULT_HANDLERS.len());
        assert!(handlers.iter().all(|h| !h.description().is_empty()));
    }
}
