//! Configuration loading, validation, and management for Taskweave.
//!
//! Loads configuration from `~/.taskweave/config.toml` with environment
//! variable overrides. Validates all settings at startup and hands the
//! engine a ready [`EngineConfig`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use taskweave_core::{ClusterMode, RetryPolicy};
use taskweave_engine::EngineConfig;

/// The root configuration structure.
///
/// Maps directly to `~/.taskweave/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Clustering strategy and tuning
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Size budget per group
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Persistence settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Retry policy for store writes
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub mode: ClusterMode,

    /// Percentile of consecutive distances used as the sequential threshold
    #[serde(default = "default_percentile")]
    pub percentile: f64,

    #[serde(default = "default_sequence_weight")]
    pub sequence_weight: f64,

    /// Fixed distance threshold; skips discovery when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,

    #[serde(default = "default_max_tightening_iterations")]
    pub max_tightening_iterations: usize,

    #[serde(default = "default_tightening_step")]
    pub tightening_step: f64,

    #[serde(default = "default_min_clusters")]
    pub min_clusters: usize,

    #[serde(default = "default_max_split_depth")]
    pub max_split_depth: usize,

    #[serde(default = "default_kmeans_seed")]
    pub kmeans_seed: u64,

    #[serde(default = "default_kmeans_iterations")]
    pub kmeans_iterations: usize,

    /// Key under which partitions are stored
    #[serde(default = "default_run_id")]
    pub run_id: String,
}

fn default_percentile() -> f64 {
    0.85
}
fn default_sequence_weight() -> f64 {
    1.0
}
fn default_max_tightening_iterations() -> usize {
    5
}
fn default_tightening_step() -> f64 {
    0.3
}
fn default_min_clusters() -> usize {
    4
}
fn default_max_split_depth() -> usize {
    10
}
fn default_kmeans_seed() -> u64 {
    42
}
fn default_kmeans_iterations() -> usize {
    100
}
fn default_run_id() -> String {
    "default".into()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            mode: ClusterMode::default(),
            percentile: default_percentile(),
            sequence_weight: default_sequence_weight(),
            threshold: None,
            max_tightening_iterations: default_max_tightening_iterations(),
            tightening_step: default_tightening_step(),
            min_clusters: default_min_clusters(),
            max_split_depth: default_max_split_depth(),
            kmeans_seed: default_kmeans_seed(),
            kmeans_iterations: default_kmeans_iterations(),
            run_id: default_run_id(),
        }
    }
}

/// Group size budget, in characters.
///
/// Unless `max_cluster_size` is pinned, the budget is derived from the
/// downstream consumer's context window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cluster_size: Option<u64>,

    #[serde(default = "default_context_tokens")]
    pub context_tokens: u64,

    /// Share of the context window a group may fill
    #[serde(default = "default_context_utilization")]
    pub context_utilization: f64,

    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: f64,

    /// Characters reserved for the prompt around a group
    #[serde(default = "default_prompt_overhead")]
    pub prompt_overhead: u64,

    /// Groups smaller than `max * ratio` may overflow the budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size_ratio: Option<f64>,
}

fn default_context_tokens() -> u64 {
    32_000
}
fn default_context_utilization() -> f64 {
    0.8
}
fn default_chars_per_token() -> f64 {
    3.6
}
fn default_prompt_overhead() -> u64 {
    1_000
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_cluster_size: None,
            context_tokens: default_context_tokens(),
            context_utilization: default_context_utilization(),
            chars_per_token: default_chars_per_token(),
            prompt_overhead: default_prompt_overhead(),
            min_size_ratio: None,
        }
    }
}

impl BudgetConfig {
    /// The effective budget: the pinned value, or
    /// `floor(tokens * utilization * chars_per_token) - overhead`.
    pub fn max_cluster_size(&self) -> u64 {
        if let Some(max) = self.max_cluster_size {
            return max;
        }
        let chars = (self.context_tokens as f64 * self.context_utilization * self.chars_per_token)
            .floor() as u64;
        chars.saturating_sub(self.prompt_overhead)
    }

    pub fn min_cluster_size(&self) -> Option<u64> {
        self.min_size_ratio
            .map(|ratio| (self.max_cluster_size() as f64 * ratio).floor() as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file, or `:memory:`
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    AppConfig::config_dir().join("taskweave.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    200
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.taskweave/config.toml).
    ///
    /// Environment variables override file values:
    /// - `TASKWEAVE_DB`: database path
    /// - `TASKWEAVE_CLUSTER_MODE`: `sequential` or `hierarchical`
    /// - `CLUSTER_THRESHOLD`: sequential percentile
    /// - `CLUSTER_MIN_GROUP_SIZE_RATIO`: minimum group size ratio
    /// - `CHAR_TOKEN_RATIO`: characters per token
    /// - `LLM_CONTEXT_LIMIT`: consumer context window in tokens
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides_with(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env_overrides_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("TASKWEAVE_DB") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(mode) = lookup("TASKWEAVE_CLUSTER_MODE") {
            self.cluster.mode = mode.parse().map_err(|reason| ConfigError::EnvError {
                name: "TASKWEAVE_CLUSTER_MODE".into(),
                reason,
            })?;
        }
        if let Some(value) = lookup("CLUSTER_THRESHOLD") {
            self.cluster.percentile = parse_env("CLUSTER_THRESHOLD", &value)?;
        }
        if let Some(value) = lookup("CLUSTER_MIN_GROUP_SIZE_RATIO") {
            self.budget.min_size_ratio = Some(parse_env("CLUSTER_MIN_GROUP_SIZE_RATIO", &value)?);
        }
        if let Some(value) = lookup("CHAR_TOKEN_RATIO") {
            self.budget.chars_per_token = parse_env("CHAR_TOKEN_RATIO", &value)?;
        }
        if let Some(value) = lookup("LLM_CONTEXT_LIMIT") {
            self.budget.context_tokens = parse_env("LLM_CONTEXT_LIMIT", &value)?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".taskweave")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let budget = &self.budget;
        if !(budget.context_utilization > 0.0 && budget.context_utilization <= 1.0) {
            return Err(ConfigError::ValidationError(
                "budget.context_utilization must be in (0, 1]".into(),
            ));
        }
        if !(budget.chars_per_token.is_finite() && budget.chars_per_token > 0.0) {
            return Err(ConfigError::ValidationError(
                "budget.chars_per_token must be > 0".into(),
            ));
        }
        if let Some(ratio) = budget.min_size_ratio
            && !(0.0..=1.0).contains(&ratio)
        {
            return Err(ConfigError::ValidationError(
                "budget.min_size_ratio must be between 0.0 and 1.0".into(),
            ));
        }
        if budget.max_cluster_size() == 0 {
            return Err(ConfigError::ValidationError(
                "effective max_cluster_size is 0; raise context_tokens or lower prompt_overhead"
                    .into(),
            ));
        }

        if self.cluster.run_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "cluster.run_id must not be empty".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        self.engine_config()
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// The engine configuration these settings describe.
    pub fn engine_config(&self) -> EngineConfig {
        let cluster = &self.cluster;
        EngineConfig {
            mode: cluster.mode,
            max_cluster_size: self.budget.max_cluster_size(),
            min_cluster_size: self.budget.min_cluster_size(),
            threshold: cluster.threshold,
            percentile: cluster.percentile,
            sequence_weight: cluster.sequence_weight,
            max_tightening_iterations: cluster.max_tightening_iterations,
            tightening_step: cluster.tightening_step,
            min_clusters: cluster.min_clusters,
            max_split_depth: cluster.max_split_depth,
            kmeans_seed: cluster.kmeans_seed,
            kmeans_iterations: cluster.kmeans_iterations,
        }
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::EnvError {
        name: name.into(),
        reason: format!("'{value}': {e}"),
    })
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid value in environment variable {name}: {reason}")]
    EnvError { name: String, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for taskweave_core::Error {
    fn from(e: ConfigError) -> Self {
        taskweave_core::Error::Config {
            message: e.to_string(),
        }
    }
}
