//! Adaptive handler routing
//!
//! This module decides which retrieval handler answers a query. The key
//! components are:
//!
//! - **Classifier**: keyword regexes that map a question to a [`Category`].
//!
//! - **UCB1 Bandit**: each (category, handler) pair is an arm. Selection
//!   balances exploiting handlers with high average reward against exploring
//!   arms with few pulls.
//!
//! - **Priors**: domain knowledge seeded before any feedback, e.g. table
//!   handlers start favored for analytical questions.
//!
//! - **Routing Store**: JSON snapshot of the Decision Store so learning
//!   survives restarts.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ragroute_core::routing::{classify, Router};
//!
//! let router = Router::new(["naive_rag", "table_rag", "graph_rag"]);
//!
//! let category = classify("What is the average order value by month?");
//! let decision = router.select_any(category).await?;
//!
//! // ... run decision.selected, collect feedback ...
//! router.update(category, &decision.selected, 0.9).await?;
//! ```

mod bandit;
mod classifier;
mod router;
mod store;
mod types;

pub use bandit::{
    ArmTable, DEFAULT_EXPLORATION, PriorTable, Ucb1Bandit, exploration_bonus, validate_reward,
};
pub use classifier::{PATTERN_ORDER, VAGUE_MAX_WORDS, classify, classify_with_scores};
pub use router::{Router, RouterBuilder, RouterConfig};
pub use store::{BANDIT_STATE_FILE, RoutingStore, RoutingStoreSummary};
pub use types::{
    ArmScore, ArmStats, ArmSummary, Category, LeaderboardEntry, RoutingDebugInfo, StatsSnapshot,
};
