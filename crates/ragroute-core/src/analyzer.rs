//! Offline analysis of the interaction ledger
//!
//! Joins feedback to decisions by interaction id and looks for patterns the
//! bandit cannot express on its own: handlers that lag or lead their
//! category, the `top_k` that earns the most reward, the category users are
//! least happy with, and whether short questions fare differently from long
//! ones. All grouping goes through ordered maps, so the same ledger always
//! produces the same report.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::routing::{Category, StatsSnapshot};
use crate::storage::{DecisionRecord, LedgerEntry};

/// Thresholds for the analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Ledger entries required before any analysis is attempted
    pub min_entries: usize,
    /// Samples a group needs before it can be flagged or recommended
    pub min_samples: usize,
    /// Distance from the category average that flags a handler
    pub margin: f64,
    /// Questions with at most this many words count as short
    pub short_query_words: usize,
    /// Questions with more than this many words count as long
    pub long_query_words: usize,
    /// Best-minus-worst average above which a preference is recommended
    pub spread_threshold: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_entries: 10,
            min_samples: 3,
            margin: 0.2,
            short_query_words: 5,
            long_query_words: 10,
            spread_threshold: 0.3,
        }
    }
}

/// Running mean of rewards
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardStats {
    pub samples: usize,
    pub total_reward: f64,
}

impl RewardStats {
    fn add(&mut self, reward: f64) {
        self.samples += 1;
        self.total_reward += reward;
    }

    pub fn average(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total_reward / self.samples as f64
        }
    }
}

/// Per-category breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryAnalysis {
    pub overall: RewardStats,
    pub handlers: BTreeMap<String, RewardStats>,
}

/// A handler whose average is far from its category's
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceFlag {
    pub category: Category,
    pub handler: String,
    pub average_reward: f64,
    pub category_average: f64,
    pub samples: usize,
}

/// Reward grouped by the `top_k` the decision used
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopKAnalysis {
    pub groups: BTreeMap<usize, RewardStats>,
    pub recommended: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardestCategory {
    pub category: Category,
    pub average_reward: f64,
}

/// Short versus long question rewards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLengthComparison {
    pub short: RewardStats,
    pub long: RewardStats,
}

/// Full analysis over a ledger with enough data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub total_entries: usize,
    pub decisions: usize,
    /// Feedback events that matched a decision
    pub joined_feedback: usize,
    /// Feedback events whose decision is missing from the ledger
    pub orphaned_feedback: usize,
    pub categories: BTreeMap<Category, CategoryAnalysis>,
    pub underperforming: Vec<PerformanceFlag>,
    pub outperforming: Vec<PerformanceFlag>,
    pub top_k: TopKAnalysis,
    pub hardest_category: Option<HardestCategory>,
    pub query_length: Option<QueryLengthComparison>,
    pub recommendations: Vec<String>,
}

/// Outcome of an analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisReport {
    InsufficientData {
        total_entries: usize,
        joined_feedback: usize,
        min_entries: usize,
        message: String,
    },
    Report(Analysis),
}

impl AnalysisReport {
    pub fn is_insufficient(&self) -> bool {
        matches!(self, Self::InsufficientData { .. })
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        match self {
            Self::Report(analysis) => Some(analysis),
            Self::InsufficientData { .. } => None,
        }
    }
}

/// One feedback event joined with its decision
struct Sample<'a> {
    decision: &'a DecisionRecord,
    reward: f64,
}

/// Read-only analyzer over ledger entries
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyze `entries` alongside the current Decision Store statistics
    pub fn analyze(&self, entries: &[LedgerEntry], stats: &StatsSnapshot) -> AnalysisReport {
        let decisions: HashMap<&str, &DecisionRecord> = entries
            .iter()
            .filter_map(|entry| match entry {
                LedgerEntry::Decision(d) => Some((d.interaction_id.as_str(), d)),
                LedgerEntry::Feedback(_) => None,
            })
            .collect();

        let mut samples = Vec::new();
        let mut orphaned = 0;
        for entry in entries {
            if let LedgerEntry::Feedback(feedback) = entry {
                match decisions.get(feedback.interaction_id.as_str()) {
                    Some(decision) => samples.push(Sample {
                        decision,
                        reward: feedback.reward,
                    }),
                    None => {
                        orphaned += 1;
                        debug!(interaction_id = %feedback.interaction_id, "Skipping orphaned feedback");
                    }
                }
            }
        }

        if entries.len() < self.config.min_entries || samples.is_empty() {
            info!(
                entries = entries.len(),
                joined = samples.len(),
                "Not enough data for analysis"
            );
            return AnalysisReport::InsufficientData {
                total_entries: entries.len(),
                joined_feedback: samples.len(),
                min_entries: self.config.min_entries,
                message: format!(
                    "Need at least {} ledger entries including feedback. Currently have {} entries and {} rated interactions.",
                    self.config.min_entries,
                    entries.len(),
                    samples.len()
                ),
            };
        }

        let categories = group_by_category(&samples);
        let (underperforming, outperforming) = self.flag_handlers(&categories);
        let top_k = self.top_k_analysis(&samples);
        let hardest_category = hardest_category(&categories);
        let query_length = self.query_length(&samples);

        let mut analysis = Analysis {
            total_entries: entries.len(),
            decisions: decisions.len(),
            joined_feedback: samples.len(),
            orphaned_feedback: orphaned,
            categories,
            underperforming,
            outperforming,
            top_k,
            hardest_category,
            query_length,
            recommendations: Vec::new(),
        };
        analysis.recommendations = self.recommendations(&analysis, stats);

        info!(
            joined = analysis.joined_feedback,
            orphaned = analysis.orphaned_feedback,
            recommendations = analysis.recommendations.len(),
            "Ledger analysis complete"
        );
        AnalysisReport::Report(analysis)
    }

    fn flag_handlers(
        &self,
        categories: &BTreeMap<Category, CategoryAnalysis>,
    ) -> (Vec<PerformanceFlag>, Vec<PerformanceFlag>) {
        let mut under = Vec::new();
        let mut over = Vec::new();

        for (category, analysis) in categories {
            let category_average = analysis.overall.average();
            for (handler, stats) in &analysis.handlers {
                if stats.samples < self.config.min_samples {
                    continue;
                }
                let average = stats.average();
                let flag = PerformanceFlag {
                    category: *category,
                    handler: handler.clone(),
                    average_reward: average,
                    category_average,
                    samples: stats.samples,
                };
                if average < category_average - self.config.margin {
                    under.push(flag);
                } else if average > category_average + self.config.margin {
                    over.push(flag);
                }
            }
        }
        (under, over)
    }

    fn top_k_analysis(&self, samples: &[Sample<'_>]) -> TopKAnalysis {
        let mut groups: BTreeMap<usize, RewardStats> = BTreeMap::new();
        for sample in samples {
            groups
                .entry(sample.decision.top_k)
                .or_default()
                .add(sample.reward);
        }

        // Ascending iteration with a strict comparison keeps the smaller k on ties.
        let mut recommended: Option<(usize, f64)> = None;
        for (k, stats) in &groups {
            if stats.samples < self.config.min_samples {
                continue;
            }
            let average = stats.average();
            if recommended.is_none_or(|(_, best)| average > best) {
                recommended = Some((*k, average));
            }
        }

        TopKAnalysis {
            groups,
            recommended: recommended.map(|(k, _)| k),
        }
    }

    fn query_length(&self, samples: &[Sample<'_>]) -> Option<QueryLengthComparison> {
        let mut short = RewardStats::default();
        let mut long = RewardStats::default();
        for sample in samples {
            let words = sample.decision.question.split_whitespace().count();
            if words <= self.config.short_query_words {
                short.add(sample.reward);
            } else if words > self.config.long_query_words {
                long.add(sample.reward);
            }
        }

        (short.samples > 0 && long.samples > 0).then_some(QueryLengthComparison { short, long })
    }

    fn recommendations(&self, analysis: &Analysis, stats: &StatsSnapshot) -> Vec<String> {
        let mut out = Vec::new();

        for (category, handlers) in stats {
            let mut best: Option<(&str, f64)> = None;
            let mut worst: Option<(&str, f64)> = None;
            for (handler, arm) in handlers {
                let average = arm.average_reward;
                if best.is_none_or(|(_, b)| average > b) {
                    best = Some((handler, average));
                }
                if worst.is_none_or(|(_, w)| average < w) {
                    worst = Some((handler, average));
                }
            }
            if let (Some((best, best_avg)), Some((worst, worst_avg))) = (best, worst) {
                if best_avg - worst_avg > self.config.spread_threshold {
                    out.push(format!(
                        "For '{}' questions, strongly prefer {} (avg: {:.3}) over {} (avg: {:.3})",
                        category, best, best_avg, worst, worst_avg
                    ));
                }
            }
        }

        for flag in &analysis.underperforming {
            out.push(format!(
                "{} struggles with {} questions (avg reward: {:.2} vs category {:.2} over {} samples)",
                flag.handler, flag.category, flag.average_reward, flag.category_average, flag.samples
            ));
        }

        for flag in &analysis.outperforming {
            out.push(format!(
                "{} excels at {} questions (avg reward: {:.2} vs category {:.2} over {} samples)",
                flag.handler, flag.category, flag.average_reward, flag.category_average, flag.samples
            ));
        }

        if let Some(lengths) = &analysis.query_length {
            let (short, long) = (lengths.short.average(), lengths.long.average());
            let easier = if short >= long { "Short" } else { "Long" };
            out.push(format!(
                "{} questions score better (short avg: {:.2} over {}, long avg: {:.2} over {})",
                easier, short, lengths.short.samples, long, lengths.long.samples
            ));
        }

        if let Some(k) = analysis.top_k.recommended {
            if analysis.top_k.groups.len() > 1 {
                out.push(format!(
                    "Use top_k = {} by default (avg reward: {:.2})",
                    k,
                    analysis.top_k.groups[&k].average()
                ));
            }
        }

        if let Some(hardest) = &analysis.hardest_category {
            out.push(format!(
                "'{}' questions are hardest (avg reward: {:.2}). Consider adding more relevant documents.",
                hardest.category, hardest.average_reward
            ));
        }

        out
    }
}

fn group_by_category(samples: &[Sample<'_>]) -> BTreeMap<Category, CategoryAnalysis> {
    let mut categories: BTreeMap<Category, CategoryAnalysis> = BTreeMap::new();
    for sample in samples {
        let analysis = categories
            .entry(sample.decision.category)
            .or_insert_with(|| CategoryAnalysis {
                overall: RewardStats::default(),
                handlers: BTreeMap::new(),
            });
        analysis.overall.add(sample.reward);
        analysis
            .handlers
            .entry(sample.decision.handler.clone())
            .or_default()
            .add(sample.reward);
    }
    categories
}

/// Lowest-average category; the earlier category wins ties
fn hardest_category(categories: &BTreeMap<Category, CategoryAnalysis>) -> Option<HardestCategory> {
    let mut hardest: Option<HardestCategory> = None;
    for (category, analysis) in categories {
        let average = analysis.overall.average();
        if hardest
            .as_ref()
            .is_none_or(|h| average < h.average_reward)
        {
            hardest = Some(HardestCategory {
                category: *category,
                average_reward: average,
            });
        }
    }
    hardest
}
