use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CacheError, Result};

/// Main configuration structure for Cascade
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Index and foreground call settings
    #[serde(default)]
    pub cache: CacheSettings,
    /// Hot tier budget (in-process)
    #[serde(default)]
    pub hot: HotConfig,
    /// Warm tier soft budget
    #[serde(default)]
    pub warm: WarmConfig,
    /// Retain score weights
    #[serde(default)]
    pub eviction: EvictionConfig,
    /// Background consolidation
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    /// Background warm-to-cold sweep and shadow cleanup
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    /// On-disk blob store location
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| CacheError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, or from the first default location that exists
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".cascade").join("config.toml")),
            dirs::config_dir().map(|c| c.join("cascade").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Reject values the cache cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.cache.shard_count == 0 || self.cache.shard_count > MAX_SHARD_COUNT {
            return Err(CacheError::Config(format!(
                "cache.shard_count must be between 1 and {MAX_SHARD_COUNT}, got {}",
                self.cache.shard_count
            )));
        }
        if self.hot.max_entries == 0 || self.hot.budget_bytes == 0 {
            return Err(CacheError::Config(
                "hot.max_entries and hot.budget_bytes must be non-zero".to_string(),
            ));
        }
        if self.eviction.recency_half_life_secs <= 0.0 {
            return Err(CacheError::Config(
                "eviction.recency_half_life_secs must be positive".to_string(),
            ));
        }
        let c = &self.consolidation;
        if c.min_group_size < 2 {
            return Err(CacheError::Config(
                "consolidation.min_group_size must be at least 2".to_string(),
            ));
        }
        if c.min_group_size > c.max_group_size {
            return Err(CacheError::Config(format!(
                "consolidation.min_group_size ({}) exceeds max_group_size ({})",
                c.min_group_size, c.max_group_size
            )));
        }
        if c.max_generation == 0 {
            return Err(CacheError::Config(
                "consolidation.max_generation must be at least 1".to_string(),
            ));
        }
        if c.enabled && c.interval_secs == 0 {
            return Err(CacheError::Config(
                "consolidation.interval_secs must be non-zero".to_string(),
            ));
        }
        if self.maintenance.enabled && self.maintenance.interval_secs == 0 {
            return Err(CacheError::Config(
                "maintenance.interval_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Upper bound on index shards
pub const MAX_SHARD_COUNT: usize = 1024;

/// Index sharding and foreground deadline
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Number of index shards (fixed for the lifetime of the cache)
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
    /// Default deadline for foreground calls that reach warm/cold storage
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

impl CacheSettings {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

fn default_shard_count() -> usize {
    64
}

fn default_io_timeout_ms() -> u64 {
    5_000
}

/// Hot tier hard caps
#[derive(Debug, Clone, Deserialize)]
pub struct HotConfig {
    /// Maximum number of records resident in memory
    #[serde(default = "default_hot_max_entries")]
    pub max_entries: usize,
    /// Maximum total size of resident records in bytes
    #[serde(default = "default_hot_budget_bytes")]
    pub budget_bytes: u64,
}

impl Default for HotConfig {
    fn default() -> Self {
        Self {
            max_entries: default_hot_max_entries(),
            budget_bytes: default_hot_budget_bytes(),
        }
    }
}

fn default_hot_max_entries() -> usize {
    10_000
}

fn default_hot_budget_bytes() -> u64 {
    64 * 1024 * 1024
}

/// Warm tier soft cap, enforced by the maintenance sweep
#[derive(Debug, Clone, Deserialize)]
pub struct WarmConfig {
    #[serde(default = "default_warm_budget_bytes")]
    pub budget_bytes: u64,
}

impl Default for WarmConfig {
    fn default() -> Self {
        Self {
            budget_bytes: default_warm_budget_bytes(),
        }
    }
}

fn default_warm_budget_bytes() -> u64 {
    1024 * 1024 * 1024
}

/// Weights for the hybrid recency/frequency retain score
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct EvictionConfig {
    /// Weight of the recency term (default: 1.0)
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,
    /// Weight of the log-scaled access count term (default: 0.25)
    #[serde(default = "default_frequency_weight")]
    pub frequency_weight: f64,
    /// Idle time at which the recency term halves (default: 1 hour)
    #[serde(default = "default_recency_half_life_secs")]
    pub recency_half_life_secs: f64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            recency_weight: default_recency_weight(),
            frequency_weight: default_frequency_weight(),
            recency_half_life_secs: default_recency_half_life_secs(),
        }
    }
}

fn default_recency_weight() -> f64 {
    1.0
}

fn default_frequency_weight() -> f64 {
    0.25
}

fn default_recency_half_life_secs() -> f64 {
    3600.0
}

/// Background consolidation policy
#[derive(Debug, Clone, Deserialize)]
pub struct ConsolidationConfig {
    /// Run the consolidation task
    #[serde(default = "default_consolidation_enabled")]
    pub enabled: bool,
    /// Seconds between ticks
    #[serde(default = "default_consolidation_interval_secs")]
    pub interval_secs: u64,
    /// Records younger than this are never candidates
    #[serde(default = "default_min_age_secs")]
    pub min_age_secs: u64,
    /// Records at this generation are never consolidated again
    #[serde(default = "default_max_generation")]
    pub max_generation: u32,
    /// Only records scoring below this are candidates
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    /// Smallest group worth consolidating
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,
    /// Largest group handed to the summarizer at once
    #[serde(default = "default_max_group_size")]
    pub max_group_size: usize,
    /// Maximum span between the oldest and newest record of a group
    #[serde(default = "default_group_window_secs")]
    pub group_window_secs: u64,
    /// Per-group summarizer deadline
    #[serde(default = "default_summarize_timeout_ms")]
    pub summarize_timeout_ms: u64,
}

impl ConsolidationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn min_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_age_secs as i64)
    }

    pub fn group_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.group_window_secs as i64)
    }

    pub fn summarize_timeout(&self) -> Duration {
        Duration::from_millis(self.summarize_timeout_ms)
    }
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: default_consolidation_enabled(),
            interval_secs: default_consolidation_interval_secs(),
            min_age_secs: default_min_age_secs(),
            max_generation: default_max_generation(),
            score_threshold: default_score_threshold(),
            min_group_size: default_min_group_size(),
            max_group_size: default_max_group_size(),
            group_window_secs: default_group_window_secs(),
            summarize_timeout_ms: default_summarize_timeout_ms(),
        }
    }
}

fn default_consolidation_enabled() -> bool {
    true
}

fn default_consolidation_interval_secs() -> u64 {
    300
}

fn default_min_age_secs() -> u64 {
    24 * 3600
}

fn default_max_generation() -> u32 {
    3
}

fn default_score_threshold() -> f64 {
    0.2
}

fn default_min_group_size() -> usize {
    2
}

fn default_max_group_size() -> usize {
    16
}

fn default_group_window_secs() -> u64 {
    6 * 3600
}

fn default_summarize_timeout_ms() -> u64 {
    30_000
}

/// Background maintenance loop
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_maintenance_enabled")]
    pub enabled: bool,
    #[serde(default = "default_maintenance_interval_secs")]
    pub interval_secs: u64,
    /// Maximum stale copies removed per tick
    #[serde(default = "default_shadow_cleanup_batch")]
    pub shadow_cleanup_batch: usize,
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: default_maintenance_enabled(),
            interval_secs: default_maintenance_interval_secs(),
            shadow_cleanup_batch: default_shadow_cleanup_batch(),
        }
    }
}

fn default_maintenance_enabled() -> bool {
    true
}

fn default_maintenance_interval_secs() -> u64 {
    60
}

fn default_shadow_cleanup_batch() -> usize {
    256
}

/// Blob store location
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory; warm and cold blobs live in `warm/` and `cold/` below it
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn warm_dir(&self) -> PathBuf {
        self.data_dir.join("warm")
    }

    pub fn cold_dir(&self) -> PathBuf {
        self.data_dir.join("cold")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".cascade"))
        .unwrap_or_else(|| PathBuf::from(".cascade"))
}
