//! Router - UCB1 handler selection over a persisted Decision Store
//!
//! The router owns the bandit state behind a single async `RwLock`. Every
//! mutating operation (selection with its pull increment, reward updates,
//! resets) is one critical section; nothing in here ever awaits a handler
//! while holding the lock.
//!
//! After each mutation the router writes the new snapshot outside the lock.
//! Snapshots carry a generation number and an older generation never
//! overwrites a newer one, so concurrent writers cannot roll the file back.
//! A failed write is logged and retried with the next mutation or `flush`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::bandit::{ArmTable, DEFAULT_EXPLORATION, PriorTable, Ucb1Bandit, validate_reward};
use super::store::{RoutingStore, RoutingStoreSummary};
use super::types::{
    ArmStats, ArmSummary, Category, LeaderboardEntry, RoutingDebugInfo, StatsSnapshot,
};
use crate::error::{Error, Result};

/// Configuration for the router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// UCB1 exploration constant `C`
    pub exploration_constant: f64,
    /// Whether to write the Decision Store after every mutation
    pub persist_stats: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            exploration_constant: DEFAULT_EXPLORATION,
            persist_stats: true,
        }
    }
}

#[derive(Debug)]
struct RouterState {
    bandit: Ucb1Bandit,
    /// Bumped on every mutation
    generation: u64,
}

impl RouterState {
    fn touch(&mut self) -> (u64, ArmTable) {
        self.generation += 1;
        (self.generation, self.bandit.arms().clone())
    }
}

/// UCB1 router over (category, handler) arms
///
/// Cloning is cheap and every clone shares the same Decision Store.
#[derive(Debug, Clone)]
pub struct Router {
    config: RouterConfig,
    /// Known handler ids, sorted
    handlers: Arc<Vec<String>>,
    state: Arc<RwLock<RouterState>>,
    store: Option<Arc<RoutingStore>>,
    /// Generation of the last snapshot that reached disk
    persisted: Arc<Mutex<u64>>,
}

impl Router {
    /// Create an in-memory router for the given handlers with default priors
    pub fn new<I, S>(handlers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RouterBuilder::new().handlers(handlers).build()
    }

    /// Restore the Decision Store from the persistent store
    ///
    /// A missing snapshot keeps the priors. A corrupt one is logged and
    /// ignored so startup never fails on bad state. Returns whether a
    /// snapshot was restored.
    pub async fn load_stats(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };

        let snapshot = match store.load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                info!(path = %store.path().display(), "No routing snapshot found, starting from priors");
                return false;
            }
            Err(e) => {
                warn!(
                    path = %store.path().display(),
                    error = %e,
                    "Routing snapshot unreadable, falling back to priors"
                );
                return false;
            }
        };

        let mut state = self.state.write().await;
        let dropped = state.bandit.import(snapshot);
        state
            .bandit
            .seed_handlers(self.handlers.iter().map(String::as_str));
        if dropped > 0 {
            warn!(dropped = dropped, "Dropped invalid arms from routing snapshot");
        }
        info!(
            path = %store.path().display(),
            "Loaded routing statistics from store"
        );
        true
    }

    /// Select a handler for `category` among `eligible` and count the pull
    pub async fn select(&self, category: Category, eligible: &[&str]) -> Result<RoutingDebugInfo> {
        let info = self.select_deferred(category, eligible).await?;
        self.persist_pending().await;
        Ok(info)
    }

    /// Like [`Router::select`] but leaves the snapshot write to the caller
    ///
    /// Nothing is awaited after the pull is counted, so a caller that drops
    /// this future either gets no pull or a completed one. Follow up with
    /// [`Router::persist_pending`] once the pull is accounted for.
    pub async fn select_deferred(
        &self,
        category: Category,
        eligible: &[&str],
    ) -> Result<RoutingDebugInfo> {
        let info = {
            let mut state = self.state.write().await;
            let info = state.bandit.select(category, eligible)?;
            state.generation += 1;
            info
        };

        debug!(
            category = %category,
            handler = %info.selected,
            total_pulls = info.total_pulls,
            "Selected handler"
        );
        Ok(info)
    }

    /// Select among every known handler
    pub async fn select_any(&self, category: Category) -> Result<RoutingDebugInfo> {
        let eligible: Vec<&str> = self.handlers.iter().map(String::as_str).collect();
        self.select(category, &eligible).await
    }

    /// Count a pull for a handler chosen outside of `select`
    pub async fn record_pull(&self, category: Category, handler: &str) -> ArmStats {
        let (stats, generation, arms) = {
            let mut state = self.state.write().await;
            let stats = state.bandit.record_pull(category, handler);
            let (generation, arms) = state.touch();
            (stats, generation, arms)
        };
        self.persist(generation, arms).await;
        stats
    }

    /// Add an observed reward to an arm
    ///
    /// Fails with `InvalidReward` outside [0, 1] and `UnknownArm` for arms
    /// the router has never seeded. Pull counts are not touched.
    pub async fn update(&self, category: Category, handler: &str, reward: f64) -> Result<ArmStats> {
        validate_reward(reward)?;

        let (stats, generation, arms) = {
            let mut state = self.state.write().await;
            let stats = match state.bandit.update(category, handler, reward) {
                Ok(stats) => stats,
                Err(e @ Error::UnknownArm { .. }) => {
                    error!(
                        category = %category,
                        handler = %handler,
                        "Reward for an arm the router never seeded"
                    );
                    return Err(e);
                }
                Err(e) => return Err(e),
            };
            let (generation, arms) = state.touch();
            (stats, generation, arms)
        };

        debug!(
            category = %category,
            handler = %handler,
            reward = reward,
            pulls = stats.pulls,
            total_reward = stats.total_reward,
            "Recorded reward"
        );

        self.persist(generation, arms).await;
        Ok(stats)
    }

    /// Current stats for one arm
    pub async fn arm(&self, category: Category, handler: &str) -> Option<ArmStats> {
        self.state.read().await.bandit.get(category, handler)
    }

    /// Full Decision Store snapshot
    pub async fn stats(&self) -> StatsSnapshot {
        let state = self.state.read().await;
        state
            .bandit
            .arms()
            .iter()
            .map(|(category, handlers)| {
                let summaries: BTreeMap<String, ArmSummary> = handlers
                    .iter()
                    .map(|(handler, stats)| (handler.clone(), (*stats).into()))
                    .collect();
                (*category, summaries)
            })
            .collect()
    }

    /// Sum of pulls over every arm of a category
    pub async fn category_pulls(&self, category: Category) -> u64 {
        let state = self.state.read().await;
        state
            .bandit
            .arms()
            .get(&category)
            .map(|m| m.values().map(|s| s.pulls).sum())
            .unwrap_or(0)
    }

    pub async fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        self.state.read().await.bandit.leaderboard()
    }

    pub async fn summary(&self) -> RoutingStoreSummary {
        RoutingStoreSummary::from_table(self.state.read().await.bandit.arms())
    }

    /// Forget every observation and go back to the priors
    pub async fn reset(&self) {
        let (generation, arms) = {
            let mut state = self.state.write().await;
            state.bandit.reset(self.handlers.iter().map(String::as_str));
            state.touch()
        };
        warn!("Routing statistics reset to priors");
        self.persist(generation, arms).await;
    }

    /// Write the current snapshot if it has not reached disk yet, logging
    /// failures instead of returning them
    pub async fn persist_pending(&self) {
        let (generation, arms) = {
            let state = self.state.read().await;
            (state.generation, state.bandit.arms().clone())
        };
        self.persist(generation, arms).await;
    }

    /// Write the current snapshot if it has not reached disk yet
    pub async fn flush(&self) -> Result<()> {
        let (generation, arms) = {
            let state = self.state.read().await;
            (state.generation, state.bandit.arms().clone())
        };
        self.write_snapshot(generation, &arms).await.map(|_| ())
    }

    /// Known handler ids, sorted
    pub fn handlers(&self) -> &[String] {
        &self.handlers
    }

    pub fn is_known_handler(&self, handler: &str) -> bool {
        self.handlers.binary_search_by(|h| h.as_str().cmp(handler)).is_ok()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    async fn persist(&self, generation: u64, arms: ArmTable) {
        if !self.config.persist_stats {
            return;
        }
        if let Err(e) = self.write_snapshot(generation, &arms).await {
            warn!(
                generation = generation,
                error = %e,
                "Failed to persist routing statistics, will retry on next change"
            );
        }
    }

    async fn write_snapshot(&self, generation: u64, arms: &ArmTable) -> Result<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let mut persisted = self.persisted.lock().await;
        if generation <= *persisted {
            return Ok(false);
        }
        store.save(arms).await?;
        *persisted = generation;
        Ok(true)
    }
}

/// Builder for Router
#[derive(Debug, Default)]
pub struct RouterBuilder {
    config: RouterConfig,
    priors: Option<PriorTable>,
    handlers: Vec<String>,
    store: Option<Arc<RoutingStore>>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set configuration
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the exploration constant
    pub fn exploration(mut self, c: f64) -> Self {
        self.config.exploration_constant = c;
        self
    }

    /// Set the prior table
    pub fn priors(mut self, priors: PriorTable) -> Self {
        self.priors = Some(priors);
        self
    }

    /// Set the handlers the router may choose from
    pub fn handlers<I, S>(mut self, handlers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.handlers = handlers.into_iter().map(Into::into).collect();
        self
    }

    /// Set routing store
    pub fn store(mut self, store: Arc<RoutingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the router with every known arm seeded
    pub fn build(self) -> Router {
        let mut handlers = self.handlers;
        handlers.sort();
        handlers.dedup();

        let mut bandit = Ucb1Bandit::new(self.priors.unwrap_or_default())
            .with_exploration(self.config.exploration_constant);
        bandit.seed_handlers(handlers.iter().map(String::as_str));

        Router {
            config: self.config,
            handlers: Arc::new(handlers),
            state: Arc::new(RwLock::new(RouterState {
                bandit,
                generation: 0,
            })),
            store: self.store,
            persisted: Arc::new(Mutex::new(0)),
        }
    }
}
