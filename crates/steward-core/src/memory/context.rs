//! The read-only memory view handed to AI consumers.
//!
//! `AiContext` is assembled only inside this module tree from digest types.
//! It holds summaries, never raw short-term or long-term values, and offers
//! no way back to them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Condensed view of one episodic entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodicDigest {
    pub when: DateTime<Utc>,
    pub kind: String,
    /// At most three insights.
    pub key_insights: Vec<String>,
    /// Number of summarized input fields.
    pub input_size: usize,
    /// Number of summarized output fields.
    pub output_size: usize,
}

/// Summarized view of one long-term insight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsightDigest {
    pub key: String,
    pub summary: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AiContext {
    namespace: String,
    episodic_summary: Vec<EpisodicDigest>,
    recent_insights: Vec<InsightDigest>,
}

impl AiContext {
    pub(crate) fn new(
        namespace: impl Into<String>,
        episodic_summary: Vec<EpisodicDigest>,
        recent_insights: Vec<InsightDigest>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            episodic_summary,
            recent_insights,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Recent episodic history, oldest first.
    pub fn episodic_summary(&self) -> &[EpisodicDigest] {
        &self.episodic_summary
    }

    /// Most recent insights, newest first.
    pub fn recent_insights(&self) -> &[InsightDigest] {
        &self.recent_insights
    }

    pub fn is_empty(&self) -> bool {
        self.episodic_summary.is_empty() && self.recent_insights.is_empty()
    }

    /// Compact JSON rendering for prompt assembly.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "episodic_summary": self.episodic_summary,
            "recent_insights": self.recent_insights,
        })
    }
}
