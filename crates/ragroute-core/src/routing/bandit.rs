//! UCB1 multi-armed bandit for handler selection
//!
//! Every (category, handler) pair is an arm with a pull count and a
//! cumulative reward. Selection maximizes the UCB1 score:
//!
//! ```text
//! score = average_reward + C * sqrt(ln(max(N, 1)) / pulls)
//! ```
//!
//! where `N` is the sum of pulls over the eligible arms of the category.
//! The first term exploits handlers with a good track record, the second
//! favors arms that have been tried less than their siblings.
//!
//! Pulls are counted when an arm is *selected*, not when its reward arrives.
//! Concurrent callers therefore see each other's selections immediately and
//! do not all pile onto the same under-explored arm.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::{ArmScore, ArmStats, Category, LeaderboardEntry, RoutingDebugInfo};
use crate::error::{Error, Result};

/// Default exploration constant, `sqrt(2)`
pub const DEFAULT_EXPLORATION: f64 = std::f64::consts::SQRT_2;

/// Arm statistics keyed by category then handler id
pub type ArmTable = BTreeMap<Category, BTreeMap<String, ArmStats>>;

/// Seeded (pulls, reward) pairs encoding what we already know about handlers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorTable {
    priors: BTreeMap<Category, BTreeMap<String, ArmStats>>,
}

impl Default for PriorTable {
    fn default() -> Self {
        Self::neutral()
            .with_prior(Category::Analytical, "table_rag", 3, 2.4)
            .with_prior(Category::Relational, "graph_rag", 3, 2.4)
            .with_prior(Category::Visual, "multimodal_rag", 3, 2.4)
            .with_prior(Category::Vague, "hyde_rag", 3, 2.1)
            .with_prior(Category::Factual, "naive_rag", 2, 1.4)
            .with_prior(Category::Factual, "hybrid_rag", 2, 1.4)
            .with_prior(Category::Procedural, "agentic_rag", 3, 2.4)
            .with_prior(Category::Procedural, "parent_child_rag", 2, 1.4)
    }
}

impl PriorTable {
    /// A table with no entries: every arm gets the neutral seed
    pub fn neutral() -> Self {
        Self {
            priors: BTreeMap::new(),
        }
    }

    /// Add or replace a prior. Zero pulls are bumped to one.
    pub fn with_prior(
        mut self,
        category: Category,
        handler: impl Into<String>,
        pulls: u64,
        total_reward: f64,
    ) -> Self {
        self.priors
            .entry(category)
            .or_default()
            .insert(handler.into(), ArmStats::new(pulls.max(1), total_reward));
        self
    }

    /// Seed for an arm: its prior, or the neutral (1, 0.5)
    pub fn seed(&self, category: Category, handler: &str) -> ArmStats {
        self.priors
            .get(&category)
            .and_then(|m| m.get(handler))
            .copied()
            .unwrap_or(ArmStats::NEUTRAL)
    }

    /// Iterate over every explicit prior
    pub fn iter(&self) -> impl Iterator<Item = (Category, &str, ArmStats)> {
        self.priors
            .iter()
            .flat_map(|(c, m)| m.iter().map(move |(h, s)| (*c, h.as_str(), *s)))
    }

    pub fn len(&self) -> usize {
        self.priors.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// UCB1 exploration bonus
///
/// Shrinks as the arm's own pulls grow and grows with the category total.
pub fn exploration_bonus(c: f64, total_pulls: u64, arm_pulls: u64) -> f64 {
    let n = total_pulls.max(1) as f64;
    let pulls = arm_pulls.max(1) as f64;
    c * (n.ln() / pulls).sqrt()
}

/// UCB1 bandit over (category, handler) arms
#[derive(Debug, Clone)]
pub struct Ucb1Bandit {
    arms: ArmTable,
    priors: PriorTable,
    exploration: f64,
}

impl Default for Ucb1Bandit {
    fn default() -> Self {
        Self::new(PriorTable::default())
    }
}

impl Ucb1Bandit {
    /// Create an empty bandit that seeds arms from `priors` on first touch
    pub fn new(priors: PriorTable) -> Self {
        Self {
            arms: BTreeMap::new(),
            priors,
            exploration: DEFAULT_EXPLORATION,
        }
    }

    /// Set the exploration constant. Negative or non-finite values fall back to the default.
    pub fn with_exploration(mut self, c: f64) -> Self {
        self.exploration = if c.is_finite() && c >= 0.0 {
            c
        } else {
            DEFAULT_EXPLORATION
        };
        self
    }

    /// Eagerly seed every category for each handler, plus every prior arm
    pub fn seed_handlers<'a>(&mut self, handlers: impl IntoIterator<Item = &'a str>) {
        for handler in handlers {
            for category in Category::ALL {
                self.ensure_arm(category, handler);
            }
        }
        let prior_arms: Vec<(Category, String)> = self
            .priors
            .iter()
            .map(|(c, h, _)| (c, h.to_string()))
            .collect();
        for (category, handler) in prior_arms {
            self.ensure_arm(category, &handler);
        }
    }

    /// Get the arm, seeding it from priors if it does not exist yet
    pub fn ensure_arm(&mut self, category: Category, handler: &str) -> &mut ArmStats {
        let seed = self.priors.seed(category, handler);
        self.arms
            .entry(category)
            .or_default()
            .entry(handler.to_string())
            .or_insert(seed)
    }

    pub fn get(&self, category: Category, handler: &str) -> Option<ArmStats> {
        self.arms.get(&category).and_then(|m| m.get(handler)).copied()
    }

    /// Score the eligible handlers without mutating anything but seeds
    ///
    /// Handlers are scored in lexicographic order so ties resolve to the
    /// first name, independent of the order the caller passed them in.
    pub fn score(&mut self, category: Category, eligible: &[&str]) -> Result<RoutingDebugInfo> {
        let mut handlers: Vec<&str> = eligible.to_vec();
        handlers.sort_unstable();
        handlers.dedup();
        if handlers.is_empty() {
            return Err(Error::NoEligibleHandlers(category));
        }

        let total_pulls: u64 = handlers
            .iter()
            .map(|h| self.ensure_arm(category, h).pulls)
            .sum();

        let mut scores = BTreeMap::new();
        let mut best: Option<(&str, f64)> = None;
        for &handler in &handlers {
            let stats = *self.ensure_arm(category, handler);
            let average_reward = stats.average_reward();
            let bonus = exploration_bonus(self.exploration, total_pulls, stats.pulls);
            let score = average_reward + bonus;
            scores.insert(
                handler.to_string(),
                ArmScore {
                    score,
                    average_reward,
                    exploration_bonus: bonus,
                    pulls: stats.pulls,
                    total_reward: stats.total_reward,
                },
            );
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((handler, score));
            }
        }

        let selected = best
            .map(|(h, _)| h.to_string())
            .ok_or(Error::NoEligibleHandlers(category))?;

        Ok(RoutingDebugInfo {
            category,
            selected,
            total_pulls,
            scores,
            manual_override: false,
            rejected_override: None,
            classifier_scores: BTreeMap::new(),
        })
    }

    /// Select the best arm and count the pull
    pub fn select(&mut self, category: Category, eligible: &[&str]) -> Result<RoutingDebugInfo> {
        let info = self.score(category, eligible)?;
        self.ensure_arm(category, &info.selected).pulls += 1;
        Ok(info)
    }

    /// Count a pull for an arm chosen by other means
    pub fn record_pull(&mut self, category: Category, handler: &str) -> ArmStats {
        let stats = self.ensure_arm(category, handler);
        stats.pulls += 1;
        *stats
    }

    /// Add an observed reward to an existing arm. Pulls are unchanged.
    pub fn update(&mut self, category: Category, handler: &str, reward: f64) -> Result<ArmStats> {
        validate_reward(reward)?;
        let stats = self
            .arms
            .get_mut(&category)
            .and_then(|m| m.get_mut(handler))
            .ok_or_else(|| Error::UnknownArm {
                category,
                handler: handler.to_string(),
            })?;
        stats.total_reward += reward;
        Ok(*stats)
    }

    pub fn arms(&self) -> &ArmTable {
        &self.arms
    }

    /// Replace state with a persisted snapshot, then seed whatever it lacks
    ///
    /// Entries that break the store invariants are dropped and re-seeded.
    /// Returns the number of dropped entries.
    pub fn import(&mut self, snapshot: ArmTable) -> usize {
        let mut dropped = 0;
        let mut arms = ArmTable::new();
        for (category, handlers) in snapshot {
            for (handler, stats) in handlers {
                if stats.is_valid() {
                    arms.entry(category).or_default().insert(handler, stats);
                } else {
                    dropped += 1;
                }
            }
        }
        self.arms = arms;
        dropped
    }

    /// Drop all observations and return to the priors
    pub fn reset<'a>(&mut self, handlers: impl IntoIterator<Item = &'a str>) {
        self.arms.clear();
        self.seed_handlers(handlers);
    }

    /// Rank handlers by their average reward across every category
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let mut totals: BTreeMap<&str, (u64, f64, usize)> = BTreeMap::new();

        for handlers in self.arms.values() {
            let mut winner: Option<(&str, f64)> = None;
            for (handler, stats) in handlers {
                let entry = totals.entry(handler.as_str()).or_default();
                entry.0 += stats.pulls;
                entry.1 += stats.total_reward;
                let avg = stats.average_reward();
                if winner.is_none_or(|(_, best)| avg > best) {
                    winner = Some((handler.as_str(), avg));
                }
            }
            if let Some((handler, _)) = winner {
                totals.entry(handler).or_default().2 += 1;
            }
        }

        let mut board: Vec<LeaderboardEntry> = totals
            .into_iter()
            .map(|(handler, (pulls, reward, won))| LeaderboardEntry {
                handler: handler.to_string(),
                total_pulls: pulls,
                average_reward: if pulls > 0 { reward / pulls as f64 } else { 0.0 },
                categories_won: won,
            })
            .collect();

        board.sort_by(|a, b| {
            b.average_reward
                .total_cmp(&a.average_reward)
                .then_with(|| a.handler.cmp(&b.handler))
        });
        board
    }
}

/// Rewards must be finite and inside [0, 1]
pub fn validate_reward(reward: f64) -> Result<()> {
    if reward.is_finite() && (0.0..=1.0).contains(&reward) {
        Ok(())
    } else {
        Err(Error::InvalidReward(reward))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HANDLERS: &[&str] = &["naive_rag", "table_rag", "graph_rag", "hyde_rag"];

    fn seeded() -> Ucb1Bandit {
        let mut bandit = Ucb1Bandit::default();
        bandit.seed_handlers(HANDLERS.iter().copied());
        bandit
    }

    #[test]
    fn test_prior_table_defaults() {
        let priors = PriorTable::default();
        assert_eq!(priors.len(), 8);
        assert_eq!(
            priors.seed(Category::Analytical, "table_rag"),
            ArmStats::new(3, 2.4)
        );
        assert_eq!(priors.seed(Category::Visual, "table_rag"), ArmStats::NEUTRAL);
    }

    #[test]
    fn test_unseen_arms_are_seeded_before_scoring() {
        let mut bandit = Ucb1Bandit::new(PriorTable::neutral());
        assert!(bandit.get(Category::Vague, "a").is_none());

        let info = bandit.score(Category::Vague, &["a", "b"]).unwrap();
        assert_eq!(info.total_pulls, 2);
        for score in info.scores.values() {
            assert!(score.score.is_finite());
            assert_eq!(score.pulls, 1);
            assert_eq!(score.average_reward, 0.5);
        }
        assert_eq!(bandit.get(Category::Vague, "a"), Some(ArmStats::NEUTRAL));
    }

    #[test]
    fn test_vague_tie_breaks_to_first_name() {
        let mut bandit = Ucb1Bandit::default();
        // No priors exist for these handlers in the vague category.
        let info = bandit
            .select(Category::Vague, &["table_rag", "naive_rag", "graph_rag"])
            .unwrap();
        assert_eq!(info.selected, "graph_rag");

        let first = info.scores.values().next().unwrap().score;
        assert!(info.scores.values().all(|s| s.score == first));
    }

    #[test]
    fn test_select_increments_pulls() {
        let mut bandit = seeded();
        let info = bandit.select(Category::Analytical, HANDLERS).unwrap();
        // table_rag has the best average but its prior pulls shrink its bonus.
        assert_eq!(info.selected, "graph_rag");
        assert_eq!(info.total_pulls, 6);

        let after = bandit.get(Category::Analytical, "graph_rag").unwrap();
        assert_eq!(after, ArmStats::new(2, 0.5));
        assert_eq!(
            bandit.get(Category::Analytical, "table_rag"),
            Some(ArmStats::new(3, 2.4))
        );
    }

    #[test]
    fn test_exploration_bonus_monotonicity() {
        let c = DEFAULT_EXPLORATION;
        assert!(exploration_bonus(c, 100, 10) < exploration_bonus(c, 100, 5));
        assert!(exploration_bonus(c, 200, 5) > exploration_bonus(c, 100, 5));
        assert_eq!(exploration_bonus(c, 0, 1), 0.0);
        assert_eq!(exploration_bonus(c, 1, 1), 0.0);
    }

    #[test]
    fn test_update_adds_reward_without_pulls() {
        let mut bandit = seeded();
        let stats = bandit
            .update(Category::Analytical, "table_rag", 1.0)
            .unwrap();
        assert_eq!(stats.pulls, 3);
        assert!((stats.total_reward - 3.4).abs() < 1e-9);
        assert!((stats.average_reward() - 1.133_333_333).abs() < 1e-6);
    }

    #[test]
    fn test_update_rejects_invalid_reward() {
        let mut bandit = seeded();
        for reward in [-0.1, 1.01, f64::NAN, f64::INFINITY] {
            let err = bandit
                .update(Category::Factual, "naive_rag", reward)
                .unwrap_err();
            assert!(matches!(err, Error::InvalidReward(_)));
        }
        assert_eq!(
            bandit.get(Category::Factual, "naive_rag"),
            Some(ArmStats::new(2, 1.4))
        );
    }

    #[test]
    fn test_update_unknown_arm() {
        let mut bandit = seeded();
        let err = bandit
            .update(Category::Factual, "never_seen", 0.5)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownArm { .. }));
    }

    #[test]
    fn test_empty_eligible_set() {
        let mut bandit = seeded();
        let err = bandit.select(Category::Factual, &[]).unwrap_err();
        assert!(matches!(err, Error::NoEligibleHandlers(Category::Factual)));
    }

    #[test]
    fn test_learning_shifts_selection() {
        let mut bandit = Ucb1Bandit::new(PriorTable::neutral());
        let handlers = ["a", "b"];
        for _ in 0..200 {
            let info = bandit.select(Category::Factual, &handlers).unwrap();
            let reward = if info.selected == "b" { 1.0 } else { 0.0 };
            bandit
                .update(Category::Factual, &info.selected, reward)
                .unwrap();
        }
        let a = bandit.get(Category::Factual, "a").unwrap();
        let b = bandit.get(Category::Factual, "b").unwrap();
        assert!(b.pulls > a.pulls * 3, "a={:?} b={:?}", a, b);
    }

    #[test]
    fn test_import_drops_invalid_entries() {
        let mut bandit = Ucb1Bandit::default();
        let mut snapshot = ArmTable::new();
        let factual = snapshot.entry(Category::Factual).or_default();
        factual.insert("naive_rag".into(), ArmStats::new(10, 7.0));
        factual.insert("broken".into(), ArmStats::new(0, 0.0));

        let dropped = bandit.import(snapshot);
        assert_eq!(dropped, 1);
        bandit.seed_handlers(["naive_rag", "broken"]);

        assert_eq!(
            bandit.get(Category::Factual, "naive_rag"),
            Some(ArmStats::new(10, 7.0))
        );
        assert_eq!(bandit.get(Category::Factual, "broken"), Some(ArmStats::NEUTRAL));
        // Prior arm missing from the snapshot is seeded fresh.
        assert_eq!(
            bandit.get(Category::Analytical, "table_rag"),
            Some(ArmStats::new(3, 2.4))
        );
    }

    #[test]
    fn test_leaderboard() {
        let bandit = seeded();
        let board = bandit.leaderboard();
        assert_eq!(board.len(), HANDLERS.len() + 4);

        let table = board.iter().find(|e| e.handler == "table_rag").unwrap();
        assert_eq!(table.categories_won, 1);
        for pair in board.windows(2) {
            assert!(pair[0].average_reward >= pair[1].average_reward);
        }
    }

    #[test]
    fn test_reset_restores_priors() {
        let mut bandit = seeded();
        bandit.update(Category::Analytical, "table_rag", 1.0).unwrap();
        bandit.select(Category::Factual, HANDLERS).unwrap();
        bandit.reset(HANDLERS.iter().copied());
        assert_eq!(
            bandit.get(Category::Analytical, "table_rag"),
            Some(ArmStats::new(3, 2.4))
        );
        assert_eq!(
            bandit.get(Category::Factual, "naive_rag"),
            Some(ArmStats::new(2, 1.4))
        );
    }
}
