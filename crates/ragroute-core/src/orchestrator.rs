//! Orchestrator - classify, route, run, record
//!
//! The orchestrator is the entry point for serving queries. A request is
//! classified, routed to a handler (by the bandit or by an explicit override),
//! run outside every lock, and recorded in the interaction ledger under a
//! fresh interaction id. Feedback for that id later flows back into the
//! router as a reward.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analyzer::{AnalysisReport, Analyzer, AnalyzerConfig};
use crate::error::{Error, Result};
use crate::handlers::{Handler, HandlerInfo, HandlerOutput, HandlerRegistry};
use crate::routing::{
    ArmSummary, Category, LeaderboardEntry, PriorTable, Router, RouterBuilder, RouterConfig,
    RoutingDebugInfo, RoutingStore, StatsSnapshot, classify, classify_with_scores, validate_reward,
};
use crate::storage::{DecisionOutcome, DecisionRecord, FeedbackRecord, InteractionLedger};

/// Request handling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// `top_k` used when the caller does not pass one
    pub default_top_k: usize,
    /// Per-attempt handler timeout
    pub handler_timeout_secs: u64,
    /// Extra attempts after a failed or timed out handler call
    pub handler_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            handler_timeout_secs: 120,
            handler_retries: 0,
        }
    }
}

/// What the handler produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RouteOutcome {
    Answered(HandlerOutput),
    Failed { code: String, error: String },
}

impl RouteOutcome {
    fn from_error(error: &Error) -> Self {
        Self::Failed {
            code: error.code().to_string(),
            error: error.to_string(),
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, Self::Answered(_))
    }
}

/// Result of routing one question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingResult {
    pub interaction_id: String,
    pub category: Category,
    pub handler: String,
    pub manual_override: bool,
    pub top_k: usize,
    pub outcome: RouteOutcome,
    pub routing: RoutingDebugInfo,
    pub feedback_hint: String,
}

impl RoutingResult {
    /// The handler output, or the failure as an error
    pub fn into_answer(self) -> Result<HandlerOutput> {
        match self.outcome {
            RouteOutcome::Answered(output) => Ok(output),
            RouteOutcome::Failed { error, .. } => Err(Error::HandlerExecutionFailure {
                handler: self.handler,
                message: error,
            }),
        }
    }
}

/// One handler's result in a side-by-side comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparedHandler {
    pub handler: String,
    pub outcome: RouteOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareResult {
    pub question: String,
    pub category: Category,
    /// In the order the handlers were requested
    pub results: Vec<ComparedHandler>,
}

/// Acknowledgement of an applied reward
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackReceipt {
    pub interaction_id: String,
    pub category: Category,
    pub handler: String,
    pub reward: f64,
    /// Arm statistics after the reward was applied
    pub arm: ArmSummary,
}

/// Records the decision as cancelled if the route future is dropped first
struct DecisionGuard<'a> {
    ledger: &'a InteractionLedger,
    record: Option<DecisionRecord>,
}

impl<'a> DecisionGuard<'a> {
    fn new(ledger: &'a InteractionLedger, record: DecisionRecord) -> Self {
        Self {
            ledger,
            record: Some(record),
        }
    }

    fn complete(mut self, outcome: DecisionOutcome, source_count: Option<usize>) {
        if let Some(mut record) = self.record.take() {
            record.outcome = outcome;
            record.source_count = source_count;
            self.ledger.record_decision(record);
        }
    }
}

impl Drop for DecisionGuard<'_> {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            warn!(
                interaction_id = %record.interaction_id,
                handler = %record.handler,
                "Request dropped before the handler finished, recording as cancelled"
            );
            self.ledger.record_decision(record);
        }
    }
}

/// Routes questions to handlers and learns from feedback
///
/// Cloning is cheap; clones share the router state and the ledger.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: Arc<HandlerRegistry>,
    router: Router,
    ledger: Arc<InteractionLedger>,
    config: OrchestratorConfig,
    analyzer: Analyzer,
}

impl Orchestrator {
    /// Assemble an orchestrator from already constructed parts
    ///
    /// The router should know every handler in `registry`; arms for handlers
    /// it does not know are seeded on first use.
    pub fn new(registry: HandlerRegistry, router: Router, ledger: Arc<InteractionLedger>) -> Self {
        Self {
            registry: Arc::new(registry),
            router,
            ledger,
            config: OrchestratorConfig::default(),
            analyzer: Analyzer::default(),
        }
    }

    /// In-memory orchestrator with default priors
    pub fn in_memory(registry: HandlerRegistry) -> Self {
        let router = Router::new(registry.ids());
        Self::new(registry, router, Arc::new(InteractionLedger::in_memory()))
    }

    pub fn builder(registry: HandlerRegistry) -> OrchestratorBuilder {
        OrchestratorBuilder::new(registry)
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_analyzer(mut self, config: AnalyzerConfig) -> Self {
        self.analyzer = Analyzer::new(config);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn ledger(&self) -> &InteractionLedger {
        &self.ledger
    }

    /// Registered handlers with their descriptions
    pub fn handlers(&self) -> Vec<HandlerInfo> {
        self.registry.infos()
    }

    /// Classify `question`, pick a handler, run it and record the decision
    ///
    /// A registered `explicit_handler` bypasses the bandit and does not count
    /// as a pull. An unregistered one is ignored and the bandit decides.
    /// Handler failures are recorded and returned in the outcome; only
    /// routing itself can make this return `Err`.
    pub async fn route(
        &self,
        question: &str,
        explicit_handler: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<RoutingResult> {
        let top_k = top_k.unwrap_or(self.config.default_top_k);
        let (category, classifier_scores) = classify_with_scores(question);

        let mut routing = match explicit_handler {
            Some(handler) if self.registry.contains(handler) => {
                debug!(category = %category, handler = %handler, "Manual handler override");
                RoutingDebugInfo::manual(category, handler)
            }
            requested => {
                if let Some(handler) = requested {
                    warn!(handler = %handler, "Requested handler is not registered, letting the router choose");
                }
                let ids = self.registry.ids();
                let eligible: Vec<&str> = ids.iter().map(String::as_str).collect();
                let mut info = self.router.select_deferred(category, &eligible).await?;
                info.rejected_override = requested.map(str::to_string);
                info
            }
        };
        routing.classifier_scores = classifier_scores;

        let handler_id = routing.selected.clone();
        let interaction_id = Uuid::new_v4().to_string();
        // Armed before the first await that follows a counted pull.
        let guard = DecisionGuard::new(
            &self.ledger,
            DecisionRecord {
                interaction_id: interaction_id.clone(),
                question: question.to_string(),
                category,
                handler: handler_id.clone(),
                top_k,
                manual_override: routing.manual_override,
                source_count: None,
                outcome: DecisionOutcome::Cancelled,
                timestamp: chrono::Utc::now(),
            },
        );
        if !routing.manual_override {
            self.router.persist_pending().await;
        }

        let Some(handler) = self.registry.get(&handler_id) else {
            let e = Error::UnknownHandler(handler_id);
            guard.complete(
                DecisionOutcome::Failed {
                    error: e.to_string(),
                },
                None,
            );
            return Err(e);
        };

        let outcome = match self.invoke(handler.as_ref(), question, top_k).await {
            Ok(output) => {
                guard.complete(DecisionOutcome::Completed, Some(output.source_count));
                RouteOutcome::Answered(output)
            }
            Err(e) => {
                guard.complete(
                    DecisionOutcome::Failed {
                        error: e.to_string(),
                    },
                    None,
                );
                RouteOutcome::from_error(&e)
            }
        };

        info!(
            interaction_id = %interaction_id,
            category = %category,
            handler = %handler_id,
            manual_override = routing.manual_override,
            top_k = top_k,
            answered = outcome.is_answered(),
            "Routed query"
        );

        Ok(RoutingResult {
            feedback_hint: format!(
                "Rate this answer with `ragroute feedback {} <reward 0.0-1.0>`",
                interaction_id
            ),
            interaction_id,
            category,
            handler: handler_id,
            manual_override: routing.manual_override,
            top_k,
            outcome,
            routing,
        })
    }

    /// Run each named handler on the same question concurrently
    ///
    /// Nothing is recorded and no arm changes.
    pub async fn compare(
        &self,
        question: &str,
        handlers: &[&str],
        top_k: Option<usize>,
    ) -> CompareResult {
        let top_k = top_k.unwrap_or(self.config.default_top_k);
        let category = classify(question);

        let runs = handlers.iter().map(|name| async move {
            let outcome = match self.registry.get(name) {
                Some(handler) => match self.invoke(handler.as_ref(), question, top_k).await {
                    Ok(output) => RouteOutcome::Answered(output),
                    Err(e) => RouteOutcome::from_error(&e),
                },
                None => RouteOutcome::from_error(&Error::UnknownHandler(name.to_string())),
            };
            ComparedHandler {
                handler: name.to_string(),
                outcome,
            }
        });
        let results = join_all(runs).await;

        debug!(category = %category, handlers = results.len(), "Compared handlers");
        CompareResult {
            question: question.to_string(),
            category,
            results,
        }
    }

    /// Apply a reward to the arm that served `interaction_id`
    ///
    /// Submitting twice applies the reward twice.
    pub async fn submit_feedback(&self, interaction_id: &str, reward: f64) -> Result<FeedbackReceipt> {
        validate_reward(reward)?;

        let decision = self
            .ledger
            .lookup(interaction_id)
            .ok_or_else(|| Error::UnknownInteraction(interaction_id.to_string()))?;

        let stats = self
            .router
            .update(decision.category, &decision.handler, reward)
            .await?;

        self.ledger.record_feedback(FeedbackRecord {
            interaction_id: interaction_id.to_string(),
            category: decision.category,
            handler: decision.handler.clone(),
            reward,
            timestamp: chrono::Utc::now(),
        });

        info!(
            interaction_id = %interaction_id,
            category = %decision.category,
            handler = %decision.handler,
            reward = reward,
            "Feedback recorded"
        );

        Ok(FeedbackReceipt {
            interaction_id: interaction_id.to_string(),
            category: decision.category,
            handler: decision.handler,
            reward,
            arm: stats.into(),
        })
    }

    pub async fn stats(&self) -> StatsSnapshot {
        self.router.stats().await
    }

    pub async fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        self.router.leaderboard().await
    }

    /// Run the offline analyzer over the whole ledger
    pub async fn optimize(&self) -> AnalysisReport {
        let stats = self.router.stats().await;
        self.analyzer.analyze(&self.ledger.entries(), &stats)
    }

    /// Return every arm to its prior; the ledger is kept
    pub async fn reset(&self) {
        self.router.reset().await;
    }

    /// Push pending state to disk
    pub async fn shutdown(&self) -> Result<()> {
        self.router.flush().await?;
        self.ledger.flush()?;
        info!("Orchestrator state flushed");
        Ok(())
    }

    async fn invoke(&self, handler: &dyn Handler, question: &str, top_k: usize) -> Result<HandlerOutput> {
        let secs = self.config.handler_timeout_secs;
        let attempts = self.config.handler_retries.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let error = match tokio::time::timeout(Duration::from_secs(secs), handler.run(question, top_k)).await {
                Ok(Ok(output)) => return Ok(output),
                Ok(Err(e @ Error::HandlerExecutionFailure { .. })) => e,
                Ok(Err(e)) => Error::HandlerExecutionFailure {
                    handler: handler.id().to_string(),
                    message: e.to_string(),
                },
                Err(_) => Error::HandlerTimeout {
                    handler: handler.id().to_string(),
                    secs,
                },
            };
            warn!(
                handler = %handler.id(),
                attempt = attempt,
                attempts = attempts,
                error = %error,
                "Handler call failed"
            );
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| Error::HandlerExecutionFailure {
            handler: handler.id().to_string(),
            message: "handler was never called".to_string(),
        }))
    }
}

/// Builder that wires the router, its store and the ledger from a data dir
#[derive(Debug)]
pub struct OrchestratorBuilder {
    registry: HandlerRegistry,
    router_config: RouterConfig,
    priors: Option<PriorTable>,
    data_dir: Option<PathBuf>,
    state_file: Option<String>,
    ledger_file: Option<String>,
    config: OrchestratorConfig,
    analyzer: AnalyzerConfig,
}

impl OrchestratorBuilder {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            router_config: RouterConfig::default(),
            priors: None,
            data_dir: None,
            state_file: None,
            ledger_file: None,
            config: OrchestratorConfig::default(),
            analyzer: AnalyzerConfig::default(),
        }
    }

    pub fn router_config(mut self, config: RouterConfig) -> Self {
        self.router_config = config;
        self
    }

    pub fn priors(mut self, priors: PriorTable) -> Self {
        self.priors = Some(priors);
        self
    }

    /// Persist the Decision Store and the ledger under `dir`
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Override the file names used inside the data dir
    pub fn file_names(mut self, state_file: impl Into<String>, ledger_file: impl Into<String>) -> Self {
        self.state_file = Some(state_file.into());
        self.ledger_file = Some(ledger_file.into());
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn analyzer(mut self, config: AnalyzerConfig) -> Self {
        self.analyzer = config;
        self
    }

    /// Build, restoring any persisted routing state and replaying the ledger
    pub async fn build(self) -> Result<Orchestrator> {
        let c = self.router_config.exploration_constant;
        if !c.is_finite() || c < 0.0 {
            return Err(Error::ConfigError(format!(
                "exploration constant must be a non-negative number, got {}",
                c
            )));
        }

        let mut router = RouterBuilder::new()
            .config(self.router_config)
            .handlers(self.registry.ids());
        if let Some(priors) = self.priors {
            router = router.priors(priors);
        }

        let ledger = match &self.data_dir {
            Some(dir) => {
                let state_path = match &self.state_file {
                    Some(name) => dir.join(name),
                    None => RoutingStore::in_dir(dir).path().to_path_buf(),
                };
                router = router.store(Arc::new(RoutingStore::new(state_path)));

                let (ledger, _) = match &self.ledger_file {
                    Some(name) => InteractionLedger::open(dir.join(name))?,
                    None => InteractionLedger::open_in_dir(dir)?,
                };
                ledger
            }
            None => InteractionLedger::in_memory(),
        };

        let router = router.build();
        router.load_stats().await;

        Ok(Orchestrator {
            registry: Arc::new(self.registry),
            router,
            ledger: Arc::new(ledger),
            config: self.config,
            analyzer: Analyzer::new(self.analyzer),
        })
    }
}
