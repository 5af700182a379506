//! Glue between the collaborators, the retry queue and memory.
//!
//! The handlers here are the standard retryable operations: appending rows
//! to a spreadsheet and fetching scrape results. Both can also be
//! registered with a `WorkflowSequencer`, since they share the [`Handler`]
//! shape. Each collaborator call first gets a few immediate in-process
//! retries ([`InlineRetry`]); only a failure that outlives them reaches the
//! durable queue.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use steward_types::error::ExternalOperationError;

use crate::collaborator::{ChatClient, ChatMessage, Completion, ScraperClient, SpreadsheetClient};
use crate::handler::{Handler, handler_fn};
use crate::memory::{LongTermBackend, MemoryManager, ShortTermBackend};
use crate::retry::{InlineRetry, RetryQueue, RetryStore, retry_call};

pub const SHEET_APPEND_OPERATION: &str = "sheets.append_rows";
pub const SCRAPE_OPERATION: &str = "scraper.fetch";

/// Namespace used when a payload does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

const SCRAPE_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_SCRAPE_LIMIT: u32 = 50;

const ANALYSIS_SYSTEM_PROMPT: &str = "You are a market analyst. Ground every statement in \
the supplied memory context and say so when the context is insufficient.";

fn required_str<'a>(
    payload: &'a Map<String, Value>,
    field: &str,
    service: &str,
) -> Result<&'a str, ExternalOperationError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ExternalOperationError::new(service, format!("payload missing '{field}'")))
}

fn namespace_of(payload: &Map<String, Value>) -> String {
    payload
        .get("namespace")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_NAMESPACE)
        .to_string()
}

/// Cache key for scrape results in short-term memory.
pub fn scrape_cache_key(query: &str) -> String {
    format!("scrape:{query}")
}

// ---------------------------------------------------------------------------
// Spreadsheet append
// ---------------------------------------------------------------------------

/// Handler for `sheets.append_rows`.
///
/// Payload: `sheet_id`, `rows`, optional `namespace` and `idempotency_key`.
/// With an idempotency key, a replay after success returns the recorded
/// result instead of appending the rows twice.
pub fn sheet_append_handler<C, S, L>(
    client: Arc<C>,
    memory: Arc<MemoryManager<S, L>>,
    inline: InlineRetry,
) -> Handler
where
    C: SpreadsheetClient,
    S: ShortTermBackend + 'static,
    L: LongTermBackend + 'static,
{
    handler_fn(move |payload: Map<String, Value>| {
        let client = Arc::clone(&client);
        let memory = Arc::clone(&memory);
        async move {
            let sheet_id = required_str(&payload, "sheet_id", "sheets")?;
            let namespace = namespace_of(&payload);
            let idempotency_key = payload.get("idempotency_key").and_then(Value::as_str);

            if let Some(key) = idempotency_key {
                if let Some(previous) = memory.completed_result(&namespace, key).await {
                    tracing::info!(sheet_id, idempotency_key = key, "rows already appended, skipping");
                    return Ok(previous);
                }
            }

            let rows = payload
                .get("rows")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let appended = retry_call(SHEET_APPEND_OPERATION, &inline, || {
                let client = Arc::clone(&client);
                let sheet_id = sheet_id.to_string();
                let rows = rows.to_vec();
                async move { client.append_rows(&sheet_id, &rows).await }
            })
            .await?;
            let result = json!({"sheet_id": sheet_id, "appended": appended});

            if let Some(key) = idempotency_key {
                memory.mark_completed(&namespace, key, &result).await;
            }
            tracing::info!(sheet_id, appended, "appended rows");
            Ok(result)
        }
    })
}

pub fn register_sheet_append<St, C, S, L>(
    queue: &RetryQueue<St>,
    client: Arc<C>,
    memory: Arc<MemoryManager<S, L>>,
    inline: InlineRetry,
) where
    St: RetryStore,
    C: SpreadsheetClient,
    S: ShortTermBackend + 'static,
    L: LongTermBackend + 'static,
{
    queue.register(SHEET_APPEND_OPERATION, sheet_append_handler(client, memory, inline));
}

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

/// Handler for `scraper.fetch`.
///
/// Payload: `query`, optional `limit` and `namespace`. Results are cached in
/// short-term memory and the run is recorded as an episode.
pub fn scrape_handler<C, S, L>(
    client: Arc<C>,
    memory: Arc<MemoryManager<S, L>>,
    inline: InlineRetry,
) -> Handler
where
    C: ScraperClient,
    S: ShortTermBackend + 'static,
    L: LongTermBackend + 'static,
{
    handler_fn(move |payload: Map<String, Value>| {
        let client = Arc::clone(&client);
        let memory = Arc::clone(&memory);
        async move {
            let query = required_str(&payload, "query", "scraper")?;
            let namespace = namespace_of(&payload);
            let limit = payload
                .get("limit")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(DEFAULT_SCRAPE_LIMIT);

            let records = retry_call(SCRAPE_OPERATION, &inline, || {
                let client = Arc::clone(&client);
                let query = query.to_string();
                async move { client.fetch(&query, limit).await }
            })
            .await?;
            let count = records.len();

            memory
                .store_short_term(
                    &namespace,
                    &scrape_cache_key(query),
                    &Value::Array(records.clone()),
                    Some(SCRAPE_CACHE_TTL),
                )
                .await;
            memory.store_episodic(
                &namespace,
                "scrape_completed",
                &json!({"query": query, "limit": limit}),
                &json!({"record_count": count}),
                vec![format!("Found {count} records for '{query}'")],
            );

            tracing::info!(namespace = %namespace, query, count, "scrape completed");
            Ok(json!({"query": query, "count": count, "records": records}))
        }
    })
}

pub fn register_scrape<St, C, S, L>(
    queue: &RetryQueue<St>,
    client: Arc<C>,
    memory: Arc<MemoryManager<S, L>>,
    inline: InlineRetry,
) where
    St: RetryStore,
    C: ScraperClient,
    S: ShortTermBackend + 'static,
    L: LongTermBackend + 'static,
{
    queue.register(SCRAPE_OPERATION, scrape_handler(client, memory, inline));
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Ask the chat collaborator about `namespace`, grounded in its memory
/// context, and record the exchange as an episode.
pub async fn analyze<S, L, C>(
    memory: &MemoryManager<S, L>,
    chat: &C,
    namespace: &str,
    prompt: &str,
    inline: &InlineRetry,
) -> Result<Completion, ExternalOperationError>
where
    S: ShortTermBackend,
    L: LongTermBackend,
    C: ChatClient,
{
    let context = memory.context(namespace).await;
    let messages = [
        ChatMessage::system(ANALYSIS_SYSTEM_PROMPT),
        ChatMessage::user(prompt),
    ];

    let completion = retry_call("chat.complete", inline, || chat.complete(&messages, &context)).await?;

    let insights = completion
        .content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| vec![line.to_string()])
        .unwrap_or_default();
    memory.store_episodic(
        namespace,
        "analysis",
        &json!({"prompt": prompt}),
        &json!({"content": completion.content, "tokens_used": completion.tokens_used}),
        insights,
    );

    tracing::info!(namespace, tokens_used = completion.tokens_used, "analysis completed");
    Ok(completion)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Utc;
    use steward_types::config::MemoryConfig;

    use super::*;
    use crate::memory::AiContext;
    use crate::retry::RetryPolicy;
    use crate::testing::{HexHasher, MapCache, MemoryRetryStore, VecStore};

    type TestMemory = MemoryManager<MapCache, VecStore>;

    fn memory() -> Arc<TestMemory> {
        Arc::new(MemoryManager::new(
            MemoryConfig::default(),
            Some(MapCache::default()),
            Some(VecStore::default()),
            Arc::new(HexHasher),
        ))
    }

    #[derive(Default)]
    struct FlakySheets {
        failures_left: AtomicU32,
        calls: AtomicU32,
        rows: Mutex<Vec<Value>>,
    }

    impl SpreadsheetClient for FlakySheets {
        async fn append_rows(&self, _sheet_id: &str, rows: &[Value]) -> Result<usize, ExternalOperationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ExternalOperationError::new("sheets", "HTTP 503"));
            }
            self.rows.lock().unwrap().extend_from_slice(rows);
            Ok(rows.len())
        }
    }

    struct FixedScraper;

    impl ScraperClient for FixedScraper {
        async fn fetch(&self, query: &str, limit: u32) -> Result<Vec<Value>, ExternalOperationError> {
            Ok((0..limit.min(3))
                .map(|i| json!({"title": format!("{query} {i}")}))
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingChat {
        seen: Mutex<Vec<Value>>,
    }

    impl ChatClient for RecordingChat {
        async fn complete(&self, messages: &[ChatMessage], context: &AiContext) -> Result<Completion, ExternalOperationError> {
            self.seen.lock().unwrap().push(context.to_json());
            Ok(Completion {
                content: format!("\nPrices are stable.\n({} messages)", messages.len()),
                tokens_used: 42,
            })
        }
    }

    /// A single attempt, so failures go straight to the durable queue.
    fn no_inline() -> InlineRetry {
        InlineRetry {
            max_retries: 1,
            backoff_factor: 1.5,
        }
    }

    fn rows_payload(key: Option<&str>) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("sheet_id".to_string(), json!("sheet-1"));
        payload.insert("namespace".to_string(), json!("client-a"));
        payload.insert("rows".to_string(), json!([{"a": 1}, {"a": 2}]));
        if let Some(key) = key {
            payload.insert("idempotency_key".to_string(), json!(key));
        }
        payload
    }

    #[tokio::test]
    async fn sheet_append_recovers_through_retry_queue() {
        let queue = RetryQueue::with_policy(
            MemoryRetryStore::default(),
            RetryPolicy::new(Duration::from_millis(10), 1),
            3,
            Duration::from_millis(20),
        );
        let sheets = Arc::new(FlakySheets {
            failures_left: AtomicU32::new(1),
            ..FlakySheets::default()
        });
        register_sheet_append(&queue, Arc::clone(&sheets), memory(), no_inline());

        let (_, ticket) = queue
            .submit_tracked(SHEET_APPEND_OPERATION, rows_payload(None), "HTTP 503", None, Some(Utc::now()))
            .await
            .unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), ticket.wait())
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(result["appended"], 2);
        assert_eq!(sheets.calls.load(Ordering::SeqCst), 2);
        assert_eq!(sheets.rows.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sheet_append_replay_is_idempotent() {
        let sheets = Arc::new(FlakySheets::default());
        let handler = sheet_append_handler(Arc::clone(&sheets), memory(), InlineRetry::default());

        let first = handler(rows_payload(Some("export-7"))).await.unwrap();
        let second = handler(rows_payload(Some("export-7"))).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(sheets.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sheets.rows.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sheet_append_requires_sheet_id() {
        let handler = sheet_append_handler(Arc::new(FlakySheets::default()), memory(), no_inline());
        let err = handler(Map::new()).await.unwrap_err();
        assert_eq!(err.message, "payload missing 'sheet_id'");
    }

    #[tokio::test]
    async fn scrape_caches_results_and_records_episode() {
        let memory = memory();
        let handler = scrape_handler(Arc::new(FixedScraper), Arc::clone(&memory), InlineRetry::default());

        let mut payload = Map::new();
        payload.insert("query".to_string(), json!("laptops"));
        payload.insert("namespace".to_string(), json!("client-a"));
        let result = handler(payload).await.unwrap();

        assert_eq!(result["count"], 3);
        let cached = memory
            .retrieve_short_term("client-a", &scrape_cache_key("laptops"))
            .await
            .unwrap();
        assert_eq!(cached.as_array().unwrap().len(), 3);

        let episodes = memory.episodic_summary("client-a", 10);
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].kind, "scrape_completed");
        assert_eq!(episodes[0].key_insights, vec!["Found 3 records for 'laptops'"]);
    }

    #[tokio::test]
    async fn analyze_sends_context_and_records_episode() {
        let memory = memory();
        memory
            .store_long_term("client-a", "pricing", &json!({"trend": "flat"}), Some("weekly"))
            .await;
        let chat = RecordingChat::default();

        let completion = analyze(memory.as_ref(), &chat, "client-a", "How are prices?", &InlineRetry::default())
            .await
            .unwrap();

        assert_eq!(completion.tokens_used, 42);
        let seen = chat.seen.lock().unwrap();
        assert_eq!(seen[0]["recent_insights"][0]["key"], "pricing");

        let episodes = memory.episodic_summary("client-a", 10);
        assert_eq!(episodes[0].kind, "analysis");
        assert_eq!(episodes[0].key_insights, vec!["Prices are stable."]);
    }

    #[tokio::test(start_paused = true)]
    async fn sheet_append_retries_inline_before_failing() {
        let sheets = Arc::new(FlakySheets {
            failures_left: AtomicU32::new(2),
            ..FlakySheets::default()
        });
        let handler = sheet_append_handler(Arc::clone(&sheets), memory(), InlineRetry::default());

        let result = handler(rows_payload(None)).await.unwrap();

        assert_eq!(result["appended"], 2);
        assert_eq!(sheets.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn sheet_append_reports_last_error_once_inline_budget_is_spent() {
        let sheets = Arc::new(FlakySheets {
            failures_left: AtomicU32::new(5),
            ..FlakySheets::default()
        });
        let handler = sheet_append_handler(Arc::clone(&sheets), memory(), InlineRetry::default());

        let err = handler(rows_payload(None)).await.unwrap_err();

        assert_eq!(err.service, "sheets");
        assert_eq!(err.message, "HTTP 503");
        assert_eq!(sheets.calls.load(Ordering::SeqCst), 3);
        assert!(sheets.rows.lock().unwrap().is_empty());
    }
}
