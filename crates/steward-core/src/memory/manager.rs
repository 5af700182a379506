//! MemoryManager -- composes the short-term, long-term and episodic tiers.
//!
//! Each external tier is optional: `None` means it was unavailable at
//! startup. Every method is safe to call in that state and degrades to
//! "skipped". Backend errors are logged and swallowed, never returned.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use steward_types::config::MemoryConfig;
use steward_types::memory::{
    EpisodicEntry, INSIGHT_MEMORY_TYPE, LongTermEntry, LongTermWrite, MemoryHealth,
};

use super::backend::{LongTermBackend, ShortTermBackend};
use super::context::{AiContext, EpisodicDigest, InsightDigest};
use super::episodic::EpisodicLog;
use super::fingerprint::{ContentHasher, fingerprint, fingerprint_digest};
use super::summarize::Summarizer;

/// How long completion markers for idempotent retries are kept.
pub const COMPLETION_MARKER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const KEY_INSIGHT_LIMIT: usize = 3;

fn short_term_key(namespace: &str, key: &str) -> String {
    format!("memory:{namespace}:{key}")
}

fn completion_key(operation_id: &str) -> String {
    format!("completed_{operation_id}")
}

pub struct MemoryManager<S: ShortTermBackend, L: LongTermBackend> {
    short_term: Option<S>,
    long_term: Option<L>,
    episodic: EpisodicLog,
    hasher: Arc<dyn ContentHasher>,
    summarizer: Summarizer,
    config: MemoryConfig,
}

impl<S: ShortTermBackend, L: LongTermBackend> MemoryManager<S, L> {
    pub fn new(
        config: MemoryConfig,
        short_term: Option<S>,
        long_term: Option<L>,
        hasher: Arc<dyn ContentHasher>,
    ) -> Self {
        if short_term.is_none() {
            tracing::warn!("short-term memory unavailable, running degraded");
        }
        if long_term.is_none() {
            tracing::warn!("long-term memory unavailable, running degraded");
        }

        Self {
            short_term,
            long_term,
            episodic: EpisodicLog::new(config.max_episodic_per_namespace),
            hasher,
            summarizer: Summarizer::from_config(&config),
            config,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Short-term
    // -----------------------------------------------------------------------

    /// Cache a value under `memory:{namespace}:{key}`.
    ///
    /// Returns whether the value was written.
    pub async fn store_short_term(
        &self,
        namespace: &str,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> bool {
        let Some(backend) = &self.short_term else {
            tracing::debug!(namespace, key, "short-term memory unavailable, skipping store");
            return false;
        };

        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        match backend.set(&short_term_key(namespace, key), value, ttl).await {
            Ok(()) => {
                tracing::debug!(namespace, key, ttl_secs = ttl.as_secs(), "stored short-term memory");
                true
            }
            Err(e) => {
                tracing::warn!(namespace, key, error = %e, "failed to store short-term memory");
                false
            }
        }
    }

    pub async fn retrieve_short_term(&self, namespace: &str, key: &str) -> Option<Value> {
        let backend = self.short_term.as_ref()?;
        match backend.get(&short_term_key(namespace, key)).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(namespace, key, error = %e, "failed to read short-term memory");
                None
            }
        }
    }

    pub async fn delete_short_term(&self, namespace: &str, key: &str) {
        let Some(backend) = &self.short_term else {
            return;
        };
        if let Err(e) = backend.delete(&short_term_key(namespace, key)).await {
            tracing::warn!(namespace, key, error = %e, "failed to delete short-term memory");
        }
    }

    // -----------------------------------------------------------------------
    // Long-term
    // -----------------------------------------------------------------------

    /// Store a curated insight (`memory_type = "insight"`).
    pub async fn store_long_term(
        &self,
        namespace: &str,
        key: &str,
        value: &Value,
        source_analysis: Option<&str>,
    ) -> LongTermWrite {
        self.store_long_term_as(namespace, INSIGHT_MEMORY_TYPE, key, value, source_analysis)
            .await
    }

    /// Store a long-term record of any memory type.
    ///
    /// Order of checks: raw-payload denylist, backend availability,
    /// duplicate fingerprint in the namespace, per-namespace cap (evicting
    /// the oldest records), then upsert.
    pub async fn store_long_term_as(
        &self,
        namespace: &str,
        memory_type: &str,
        key: &str,
        value: &Value,
        source_analysis: Option<&str>,
    ) -> LongTermWrite {
        if self.summarizer.contains_denylisted(value) {
            tracing::warn!(namespace, key, "refusing to store raw payload in long-term memory");
            return LongTermWrite::Rejected;
        }

        let Some(backend) = &self.long_term else {
            tracing::debug!(namespace, key, "long-term memory unavailable, skipping store");
            return LongTermWrite::Skipped;
        };

        let fingerprint = fingerprint(self.hasher.as_ref(), value);

        match backend.fingerprint_exists(namespace, &fingerprint).await {
            Ok(true) => {
                tracing::debug!(namespace, key, fingerprint = %fingerprint, "duplicate long-term memory");
                return LongTermWrite::Duplicate;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(namespace, key, error = %e, "long-term duplicate check failed");
                return LongTermWrite::Skipped;
            }
        }

        let cap = self.config.max_long_term_per_namespace;
        let count = match backend.count(namespace).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(namespace, error = %e, "long-term count failed");
                return LongTermWrite::Skipped;
            }
        };
        if count >= cap {
            let excess = self.config.eviction_batch.max(count - cap + 1);
            match backend.evict_oldest(namespace, excess).await {
                Ok(evicted) => {
                    tracing::info!(namespace, evicted, cap, "evicted oldest long-term memories");
                }
                Err(e) => {
                    tracing::warn!(namespace, error = %e, "long-term eviction failed");
                    return LongTermWrite::Skipped;
                }
            }
        }

        let now = Utc::now();
        let entry = LongTermEntry {
            namespace: namespace.to_string(),
            memory_type: memory_type.to_string(),
            key: key.to_string(),
            storage_key: format!("{key}_{}", fingerprint_digest(&fingerprint)),
            fingerprint,
            value: value.clone(),
            source_analysis: source_analysis.map(str::to_string),
            created_at: now,
            updated_at: now,
        };

        match backend.upsert(&entry).await {
            Ok(()) => {
                tracing::info!(namespace, key, memory_type, "stored long-term memory");
                LongTermWrite::Stored
            }
            Err(e) => {
                tracing::warn!(namespace, key, error = %e, "failed to store long-term memory");
                LongTermWrite::Skipped
            }
        }
    }

    /// Newest long-term record stored under the logical `key`.
    pub async fn retrieve_long_term(&self, namespace: &str, key: &str) -> Option<LongTermEntry> {
        let backend = self.long_term.as_ref()?;
        match backend.latest_by_key(namespace, key).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(namespace, key, error = %e, "failed to read long-term memory");
                None
            }
        }
    }

    /// Long-term records of `memory_type`, newest first, one page.
    pub async fn search(&self, namespace: &str, memory_type: &str) -> Vec<LongTermEntry> {
        self.search_limited(namespace, memory_type, self.config.search_page_size)
            .await
    }

    async fn search_limited(
        &self,
        namespace: &str,
        memory_type: &str,
        limit: u32,
    ) -> Vec<LongTermEntry> {
        let Some(backend) = &self.long_term else {
            return Vec::new();
        };
        match backend.search(namespace, memory_type, limit).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(namespace, memory_type, error = %e, "long-term search failed");
                Vec::new()
            }
        }
    }

    // -----------------------------------------------------------------------
    // Episodic
    // -----------------------------------------------------------------------

    /// Record a summarized episode for `namespace`.
    pub fn store_episodic(
        &self,
        namespace: &str,
        kind: &str,
        input: &Value,
        output: &Value,
        insights: Vec<String>,
    ) {
        let entry = EpisodicEntry {
            timestamp: Utc::now(),
            kind: kind.to_string(),
            input_summary: self.summarizer.summarize(input),
            output_summary: self.summarizer.summarize(output),
            insights,
            input_keys: self.summarizer.field_names(input),
            output_keys: self.summarizer.field_names(output),
        };

        let dropped = self.episodic.push(namespace, entry);
        tracing::debug!(namespace, kind, dropped, "recorded episodic memory");
    }

    /// Digests of the most recent `max_entries` episodes, oldest first.
    pub fn episodic_summary(&self, namespace: &str, max_entries: usize) -> Vec<EpisodicDigest> {
        self.episodic
            .recent(namespace, max_entries)
            .into_iter()
            .map(|entry| EpisodicDigest {
                when: entry.timestamp,
                input_size: entry.input_summary.len(),
                output_size: entry.output_summary.len(),
                kind: entry.kind,
                key_insights: entry.insights.into_iter().take(KEY_INSIGHT_LIMIT).collect(),
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // AI context
    // -----------------------------------------------------------------------

    /// Assemble the summarized view an AI consumer may see.
    pub async fn context(&self, namespace: &str) -> AiContext {
        let episodic_summary =
            self.episodic_summary(namespace, self.config.episodic_summary_entries);

        let limit = u32::try_from(self.config.context_insight_limit).unwrap_or(u32::MAX);
        let recent_insights = self
            .search_limited(namespace, INSIGHT_MEMORY_TYPE, limit)
            .await
            .into_iter()
            .map(|entry| InsightDigest {
                summary: self.summarizer.summarize(&entry.value),
                key: entry.key,
                created_at: entry.created_at,
            })
            .collect();

        AiContext::new(namespace, episodic_summary, recent_insights)
    }

    // -----------------------------------------------------------------------
    // Completion markers
    // -----------------------------------------------------------------------

    /// Record that an idempotent operation finished, with its result.
    pub async fn mark_completed(&self, namespace: &str, operation_id: &str, result: &Value) -> bool {
        self.store_short_term(
            namespace,
            &completion_key(operation_id),
            result,
            Some(COMPLETION_MARKER_TTL),
        )
        .await
    }

    /// Result recorded by [`mark_completed`](Self::mark_completed), if any.
    pub async fn completed_result(&self, namespace: &str, operation_id: &str) -> Option<Value> {
        self.retrieve_short_term(namespace, &completion_key(operation_id))
            .await
    }

    // -----------------------------------------------------------------------
    // Health
    // -----------------------------------------------------------------------

    pub async fn health(&self) -> MemoryHealth {
        let short_term = match &self.short_term {
            Some(backend) => backend.ping().await.is_ok(),
            None => false,
        };
        let long_term = match &self.long_term {
            Some(backend) => backend.ping().await.is_ok(),
            None => false,
        };
        MemoryHealth {
            short_term,
            long_term,
        }
    }
}
