//! Narrow interfaces to the external services handlers call.
//!
//! Scraping, spreadsheet export and AI chat are collaborators, not part of
//! this crate. Implementations wrap real HTTP clients; tests use doubles.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use steward_types::error::ExternalOperationError;

use crate::memory::AiContext;

/// Fetches raw records (e.g. product listings) for a search query.
pub trait ScraperClient: Send + Sync + 'static {
    fn fetch(
        &self,
        query: &str,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Value>, ExternalOperationError>> + Send;
}

/// Appends rows to a spreadsheet.
pub trait SpreadsheetClient: Send + Sync + 'static {
    /// Returns the number of rows appended.
    fn append_rows(
        &self,
        sheet_id: &str,
        rows: &[Value],
    ) -> impl std::future::Future<Output = Result<usize, ExternalOperationError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub tokens_used: u32,
}

/// AI chat completion.
///
/// Receives memory only as an [`AiContext`], never raw stored values.
pub trait ChatClient: Send + Sync + 'static {
    fn complete(
        &self,
        messages: &[ChatMessage],
        context: &AiContext,
    ) -> impl std::future::Future<Output = Result<Completion, ExternalOperationError>> + Send;
}
