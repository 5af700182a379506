//! Configuration types for Steward.
//!
//! `StewardConfig` represents the top-level `config.toml`. Every field has a
//! default so an empty or partial file is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.steward/config.toml` (or `$STEWARD_DATA_DIR/config.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StewardConfig {
    #[serde(default)]
    pub sequencer: SequencerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Workflow sequencer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// Capacity of the lifecycle event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
        }
    }
}

/// Which durable store backs the retry queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStoreKind {
    /// Embedded SQLite tables in the main database.
    #[default]
    Sqlite,
    /// One JSON file per operation under `storage_dir`.
    File,
}

/// Durable retry queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Backoff base delay in seconds (attempt index 0).
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    /// Backoff multiplier applied per attempt index.
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
    /// Upper bound on how long the processor sleeps between checks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub store: RetryStoreKind,
    /// Directory for the file store. Defaults to `{data_dir}/retry_queue`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<String>,
    /// Bounded in-process retries (`retry_with_backoff`).
    #[serde(default = "default_inline_max_retries")]
    pub inline_max_retries: u32,
    #[serde(default = "default_inline_backoff_factor")]
    pub inline_backoff_factor: f64,
}

fn default_base_delay_secs() -> u64 {
    300
}

fn default_multiplier() -> u32 {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_inline_max_retries() -> u32 {
    3
}

fn default_inline_backoff_factor() -> f64 {
    1.5
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: default_base_delay_secs(),
            multiplier: default_multiplier(),
            default_max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            store: RetryStoreKind::default(),
            storage_dir: None,
            inline_max_retries: default_inline_max_retries(),
            inline_backoff_factor: default_inline_backoff_factor(),
        }
    }
}

/// Tiered memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Redis URL for the short-term tier. Uses the in-process cache when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
    /// SQLite URL for long-term memory and the SQLite retry store.
    /// Defaults to `{data_dir}/steward.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Per-namespace long-term cap.
    #[serde(default = "default_max_long_term")]
    pub max_long_term_per_namespace: u64,
    /// Minimum number of oldest records evicted once the cap is reached.
    #[serde(default = "default_eviction_batch")]
    pub eviction_batch: u64,
    /// Per-namespace episodic ring buffer capacity.
    #[serde(default = "default_max_episodic")]
    pub max_episodic_per_namespace: usize,
    #[serde(default = "default_search_page_size")]
    pub search_page_size: u32,
    /// Number of long-term insights included in AI context.
    #[serde(default = "default_context_insight_limit")]
    pub context_insight_limit: usize,
    /// Number of episodic entries included in AI context.
    #[serde(default = "default_episodic_summary_entries")]
    pub episodic_summary_entries: usize,
    /// Strings longer than this are truncated in summaries.
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
    /// Field names that mark raw, unprocessed payloads.
    #[serde(default = "default_raw_payload_denylist")]
    pub raw_payload_denylist: Vec<String>,
}

fn default_ttl_secs() -> u64 {
    86_400
}

fn default_max_long_term() -> u64 {
    1_000
}

fn default_eviction_batch() -> u64 {
    1
}

fn default_max_episodic() -> usize {
    100
}

fn default_search_page_size() -> u32 {
    50
}

fn default_context_insight_limit() -> usize {
    5
}

fn default_episodic_summary_entries() -> usize {
    10
}

fn default_summary_max_chars() -> usize {
    100
}

fn default_raw_payload_denylist() -> Vec<String> {
    vec!["raw_prompt".to_string(), "scraper_payload".to_string()]
}

impl MemoryConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            database_url: None,
            default_ttl_secs: default_ttl_secs(),
            max_long_term_per_namespace: default_max_long_term(),
            eviction_batch: default_eviction_batch(),
            max_episodic_per_namespace: default_max_episodic(),
            search_page_size: default_search_page_size(),
            context_insight_limit: default_context_insight_limit(),
            episodic_summary_entries: default_episodic_summary_entries(),
            summary_max_chars: default_summary_max_chars(),
            raw_payload_denylist: default_raw_payload_denylist(),
        }
    }
}
