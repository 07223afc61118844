//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::analyzer::AnalyzerConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::routing::{BANDIT_STATE_FILE, RouterConfig};
use crate::storage::LEDGER_FILE;

/// Ragroute configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub router: RouterConfig,
    pub storage: StorageConfig,
    pub orchestrator: OrchestratorConfig,
    pub analyzer: AnalyzerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Where state lives; `RAGROUTE_DATA_DIR` takes precedence
    pub data_dir: Option<PathBuf>,
    pub state_file: String,
    pub ledger_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            state_file: BANDIT_STATE_FILE.to_string(),
            ledger_file: LEDGER_FILE.to_string(),
        }
    }
}

const KEYS: &[&str] = &[
    "router.exploration_constant",
    "router.persist_stats",
    "storage.data_dir",
    "storage.state_file",
    "storage.ledger_file",
    "orchestrator.default_top_k",
    "orchestrator.handler_timeout_secs",
    "orchestrator.handler_retries",
    "analyzer.min_entries",
    "analyzer.min_samples",
    "analyzer.margin",
    "analyzer.short_query_words",
    "analyzer.long_query_words",
    "analyzer.spread_threshold",
];

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid {} value: {}", key, value))
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("RAGROUTE_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("ragroute")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Directory holding the routing snapshot and the ledger
    pub fn data_dir(&self) -> anyhow::Result<PathBuf> {
        if let Ok(custom_dir) = env::var("RAGROUTE_DATA_DIR") {
            return Ok(PathBuf::from(custom_dir));
        }
        if let Some(dir) = &self.storage.data_dir {
            return Ok(dir.clone());
        }
        Ok(dirs::data_dir()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?
            .join("ragroute"))
    }

    /// Load configuration from file, or the defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let c = self.router.exploration_constant;
        if !c.is_finite() || c < 0.0 {
            return Err(anyhow!("router.exploration_constant must be a non-negative number"));
        }
        if self.storage.state_file.trim().is_empty() || self.storage.ledger_file.trim().is_empty() {
            return Err(anyhow!("storage file names must not be empty"));
        }
        if self.storage.state_file == self.storage.ledger_file {
            return Err(anyhow!("storage.state_file and storage.ledger_file must differ"));
        }
        if self.orchestrator.default_top_k == 0 {
            return Err(anyhow!("orchestrator.default_top_k must be at least 1"));
        }
        if self.orchestrator.handler_timeout_secs == 0 {
            return Err(anyhow!("orchestrator.handler_timeout_secs must be at least 1"));
        }
        if self.analyzer.min_samples == 0 {
            return Err(anyhow!("analyzer.min_samples must be at least 1"));
        }
        for (key, value) in [
            ("analyzer.margin", self.analyzer.margin),
            ("analyzer.spread_threshold", self.analyzer.spread_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be between 0.0 and 1.0", key));
            }
        }
        if self.analyzer.short_query_words > self.analyzer.long_query_words {
            return Err(anyhow!(
                "analyzer.short_query_words must not exceed analyzer.long_query_words"
            ));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let value = match key {
            "router.exploration_constant" => self.router.exploration_constant.to_string(),
            "router.persist_stats" => self.router.persist_stats.to_string(),

            "storage.data_dir" => match &self.storage.data_dir {
                Some(dir) => dir.display().to_string(),
                None => "(default)".to_string(),
            },
            "storage.state_file" => self.storage.state_file.clone(),
            "storage.ledger_file" => self.storage.ledger_file.clone(),

            "orchestrator.default_top_k" => self.orchestrator.default_top_k.to_string(),
            "orchestrator.handler_timeout_secs" => {
                self.orchestrator.handler_timeout_secs.to_string()
            }
            "orchestrator.handler_retries" => self.orchestrator.handler_retries.to_string(),

            "analyzer.min_entries" => self.analyzer.min_entries.to_string(),
            "analyzer.min_samples" => self.analyzer.min_samples.to_string(),
            "analyzer.margin" => self.analyzer.margin.to_string(),
            "analyzer.short_query_words" => self.analyzer.short_query_words.to_string(),
            "analyzer.long_query_words" => self.analyzer.long_query_words.to_string(),
            "analyzer.spread_threshold" => self.analyzer.spread_threshold.to_string(),

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `ragroute config list` to see available keys.",
                    key
                ));
            }
        };
        Ok(value)
    }

    /// Set a configuration value by key
    ///
    /// The whole config is validated afterwards; on error nothing changes.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut next = self.clone();
        match key {
            "router.exploration_constant" => next.router.exploration_constant = parse(key, value)?,
            "router.persist_stats" => next.router.persist_stats = parse(key, value)?,

            "storage.data_dir" => {
                let value = value.trim();
                next.storage.data_dir = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            "storage.state_file" => next.storage.state_file = value.trim().to_string(),
            "storage.ledger_file" => next.storage.ledger_file = value.trim().to_string(),

            "orchestrator.default_top_k" => next.orchestrator.default_top_k = parse(key, value)?,
            "orchestrator.handler_timeout_secs" => {
                next.orchestrator.handler_timeout_secs = parse(key, value)?
            }
            "orchestrator.handler_retries" => {
                next.orchestrator.handler_retries = parse(key, value)?
            }

            "analyzer.min_entries" => next.analyzer.min_entries = parse(key, value)?,
            "analyzer.min_samples" => next.analyzer.min_samples = parse(key, value)?,
            "analyzer.margin" => next.analyzer.margin = parse(key, value)?,
            "analyzer.short_query_words" => next.analyzer.short_query_words = parse(key, value)?,
            "analyzer.long_query_words" => next.analyzer.long_query_words = parse(key, value)?,
            "analyzer.spread_threshold" => next.analyzer.spread_threshold = parse(key, value)?,

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `ragroute config list` to see available keys.",
                    key
                ));
            }
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}
