//! Types for adaptive handler routing
//!
//! This module defines the core types used by the router: query categories,
//! arm statistics, and the debug information attached to every decision.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of incoming query, assigned once by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// "what is", "who is", "define"
    Factual,
    /// "compare", "how many", "average", "trend"
    Analytical,
    /// "related to", "between", "reports to"
    Relational,
    /// "how to", "steps to", "configure"
    Procedural,
    /// Short or intent-free queries
    Vague,
    /// "image", "diagram", "chart"
    Visual,
}

impl Category {
    /// All categories, in declaration order
    pub const ALL: [Category; 6] = [
        Self::Factual,
        Self::Analytical,
        Self::Relational,
        Self::Procedural,
        Self::Vague,
        Self::Visual,
    ];

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Factual => "factual",
            Self::Analytical => "analytical",
            Self::Relational => "relational",
            Self::Procedural => "procedural",
            Self::Vague => "vague",
            Self::Visual => "visual",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "factual" => Ok(Self::Factual),
            "analytical" => Ok(Self::Analytical),
            "relational" => Ok(Self::Relational),
            "procedural" => Ok(Self::Procedural),
            "vague" => Ok(Self::Vague),
            "visual" => Ok(Self::Visual),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

/// Pull count and cumulative reward for one (category, handler) arm
///
/// `pulls` is never zero once an arm is seeded, which keeps the UCB1
/// exploration term defined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmStats {
    pub pulls: u64,
    pub total_reward: f64,
}

impl ArmStats {
    /// Neutral seed used for arms without a prior: one pull at 0.5
    pub const NEUTRAL: ArmStats = ArmStats {
        pulls: 1,
        total_reward: 0.5,
    };

    pub fn new(pulls: u64, total_reward: f64) -> Self {
        Self {
            pulls,
            total_reward,
        }
    }

    /// Average reward per pull. Not clamped.
    pub fn average_reward(&self) -> f64 {
        if self.pulls == 0 {
            return 0.0;
        }
        self.total_reward / self.pulls as f64
    }

    /// Whether this entry satisfies the store invariants
    pub fn is_valid(&self) -> bool {
        self.pulls >= 1 && self.total_reward.is_finite() && self.total_reward >= 0.0
    }
}

/// Score breakdown for a single handler during selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmScore {
    pub score: f64,
    pub average_reward: f64,
    pub exploration_bonus: f64,
    pub pulls: u64,
    pub total_reward: f64,
}

/// Everything the router looked at when it made a decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDebugInfo {
    pub category: Category,
    pub selected: String,
    /// Sum of pulls over the eligible arms before this selection
    pub total_pulls: u64,
    /// UCB1 breakdown per eligible handler, keyed by handler id
    pub scores: BTreeMap<String, ArmScore>,
    /// Set when the caller named a handler explicitly
    #[serde(default)]
    pub manual_override: bool,
    /// Explicit handler that was requested but is not registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_override: Option<String>,
    /// Per-category classifier match counts
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub classifier_scores: BTreeMap<Category, usize>,
}

impl RoutingDebugInfo {
    /// Debug info for a handler chosen explicitly by the caller
    pub fn manual(category: Category, handler: impl Into<String>) -> Self {
        Self {
            category,
            selected: handler.into(),
            total_pulls: 0,
            scores: BTreeMap::new(),
            manual_override: true,
            rejected_override: None,
            classifier_scores: BTreeMap::new(),
        }
    }
}

/// Read-only view of one arm for stats queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSummary {
    pub pulls: u64,
    pub total_reward: f64,
    pub average_reward: f64,
}

impl From<ArmStats> for ArmSummary {
    fn from(stats: ArmStats) -> Self {
        Self {
            pulls: stats.pulls,
            total_reward: stats.total_reward,
            average_reward: stats.average_reward(),
        }
    }
}

/// Full Decision Store snapshot: category -> handler -> summary
pub type StatsSnapshot = BTreeMap<Category, BTreeMap<String, ArmSummary>>;

/// Overall standing of a handler across every category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub handler: String,
    pub total_pulls: u64,
    pub average_reward: f64,
    /// Categories where this handler holds the best average
    pub categories_won: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_roundtrip_names() {
        for category in Category::ALL {
            let parsed: Category = category.as_str().parse().unwrap();
            assert_eq!(parsed, category);
        }
        assert!("nonsense".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_serde_snake_case() {
        let json = serde_json::to_string(&Category::Procedural).unwrap();
        assert_eq!(json, "\"procedural\"");
    }

    #[test]
    fn test_arm_stats_average_is_unclamped() {
        let stats = ArmStats::new(3, 3.4);
        assert!((stats.average_reward() - 3.4 / 3.0).abs() < 1e-12);
        assert!(stats.average_reward() > 1.0);
    }

    #[test]
    fn test_arm_stats_validity() {
        assert!(ArmStats::NEUTRAL.is_valid());
        assert!(!ArmStats::new(0, 0.0).is_valid());
        assert!(!ArmStats::new(2, f64::NAN).is_valid());
        assert!(!ArmStats::new(2, -1.0).is_valid());
    }
}
