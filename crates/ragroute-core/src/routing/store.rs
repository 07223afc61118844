//! Persistent storage for routing statistics
//!
//! The Decision Store is written as a single JSON document:
//!
//! ```text
//! {
//!   "analytical": { "table_rag": { "pulls": 3, "total_reward": 2.4 }, ... },
//!   ...
//! }
//! ```
//!
//! Saves go through a temporary sibling file and a rename, so a crash mid-write
//! leaves the previous snapshot intact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::bandit::ArmTable;
use super::types::{ArmStats, Category};
use crate::error::{Error, Result};

/// Default snapshot file name inside the data directory
pub const BANDIT_STATE_FILE: &str = "bandit_state.json";

type RawSnapshot = BTreeMap<String, BTreeMap<String, ArmStats>>;

/// Store for persisting routing statistics
#[derive(Debug, Clone)]
pub struct RoutingStore {
    path: PathBuf,
}

impl RoutingStore {
    /// Create a store backed by the given snapshot file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a store using the default file name inside `data_dir`
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(BANDIT_STATE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted snapshot
    ///
    /// Returns `Ok(None)` when nothing has been saved yet. Categories that no
    /// longer exist are skipped with a warning; a file that does not parse at
    /// all is an error so the caller can decide how to recover.
    pub async fn load(&self) -> Result<Option<ArmTable>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        let raw: RawSnapshot = serde_json::from_str(&contents)?;
        let mut table = ArmTable::new();
        for (category, handlers) in raw {
            match category.parse::<Category>() {
                Ok(category) => {
                    table.insert(category, handlers);
                }
                Err(_) => {
                    warn!(category = %category, path = %self.path.display(), "Skipping unknown category in routing snapshot");
                }
            }
        }

        debug!(
            path = %self.path.display(),
            categories = table.len(),
            "Loaded routing statistics"
        );
        Ok(Some(table))
    }

    /// Save the whole table, replacing the previous snapshot
    pub async fn save(&self, table: &ArmTable) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persistence_error(&self.path, e))?;
        }

        let contents = serde_json::to_vec_pretty(table)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| persistence_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| persistence_error(&self.path, e))?;

        debug!(path = %self.path.display(), "Saved routing statistics");
        Ok(())
    }

    /// Remove the snapshot file. Returns whether one existed.
    pub async fn clear(&self) -> Result<bool> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "Cleared routing statistics");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(persistence_error(&self.path, e)),
        }
    }
}

fn persistence_error(path: &Path, e: std::io::Error) -> Error {
    Error::PersistenceFailure(format!("{}: {}", path.display(), e))
}

/// Summary of a routing table
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingStoreSummary {
    /// Number of categories with at least one arm
    pub category_count: usize,
    /// Number of distinct handlers
    pub handler_count: usize,
    /// Total pulls across every arm
    pub total_pulls: u64,
    /// Total reward across every arm
    pub total_reward: f64,
}

impl RoutingStoreSummary {
    pub fn from_table(table: &ArmTable) -> Self {
        let mut handlers = std::collections::BTreeSet::new();
        let mut total_pulls = 0;
        let mut total_reward = 0.0;
        for arms in table.values() {
            for (handler, stats) in arms {
                handlers.insert(handler.as_str());
                total_pulls += stats.pulls;
                total_reward += stats.total_reward;
            }
        }
        Self {
            category_count: table.values().filter(|m| !m.is_empty()).count(),
            handler_count: handlers.len(),
            total_pulls,
            total_reward,
        }
    }

    /// Overall average reward per pull
    pub fn average_reward(&self) -> f64 {
        if self.total_pulls == 0 {
            return 0.0;
        }
        self.total_reward / self.total_pulls as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    fn create_test_store() -> (RoutingStore, TempDir) {
        let dir = tempdir().unwrap();
        let store = RoutingStore::in_dir(dir.path());
        (store, dir)
    }

    fn sample_table() -> ArmTable {
        let mut table = ArmTable::new();
        let analytical = table.entry(Category::Analytical).or_default();
        analytical.insert("table_rag".into(), ArmStats::new(3, 2.4));
        analytical.insert("naive_rag".into(), ArmStats::new(1, 0.5));
        table
            .entry(Category::Vague)
            .or_default()
            .insert("hyde_rag".into(), ArmStats::new(5, 3.0));
        table
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let (store, _temp) = create_test_store();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();
        let table = sample_table();
        store.save(&table).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, table);
    }

    #[tokio::test]
    async fn test_layout_is_category_then_handler() {
        let (store, _temp) = create_test_store();
        store.save(&sample_table()).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["analytical"]["table_rag"]["pulls"], 3);
        assert_eq!(raw["vague"]["hyde_rag"]["total_reward"], 3.0);
    }

    #[tokio::test]
    async fn test_unknown_category_is_skipped() {
        let (store, _temp) = create_test_store();
        std::fs::write(
            store.path(),
            r#"{"factual": {"naive_rag": {"pulls": 2, "total_reward": 1.0}},
                "astrology": {"naive_rag": {"pulls": 2, "total_reward": 1.0}}}"#,
        )
        .unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key(&Category::Factual));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let (store, _temp) = create_test_store();
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(
            store.load().await.unwrap_err(),
            Error::Serialization(_)
        ));
    }

    #[tokio::test]
    async fn test_clear() {
        let (store, _temp) = create_test_store();
        assert!(!store.clear().await.unwrap());
        store.save(&sample_table()).await.unwrap();
        assert!(store.clear().await.unwrap());
        assert!(store.load().await.unwrap().is_none());
    }

    #[test]
    fn test_summary() {
        let summary = RoutingStoreSummary::from_table(&sample_table());
        assert_eq!(summary.category_count, 2);
        assert_eq!(summary.handler_count, 3);
        assert_eq!(summary.total_pulls, 9);
        assert!((summary.average_reward() - 5.9 / 9.0).abs() < 1e-9);
    }
}
