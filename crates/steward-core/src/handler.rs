//! Handler types shared by the sequencer and the retry queue.
//!
//! Both components dispatch by name to an async closure that takes a JSON
//! payload and returns a JSON result or an [`ExternalOperationError`].

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use steward_types::error::ExternalOperationError;

/// Boxed future returned by a [`Handler`].
pub type HandlerFuture = BoxFuture<'static, Result<Value, ExternalOperationError>>;

/// A named unit of work: payload in, JSON result out.
///
/// When registered with the retry queue, a handler is invoked
/// **at least once** per submitted operation and possibly more than once for
/// the same logical operation (a crash between a successful call and the
/// record's removal replays it). Handlers must be idempotent, or check a
/// completion marker (`MemoryManager::completed_result`) before doing work.
pub type Handler = Arc<dyn Fn(Map<String, Value>) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ExternalOperationError>> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handler_fn_boxes_closure() {
        let handler = handler_fn(|payload: Map<String, Value>| async move {
            Ok(Value::from(payload.len()))
        });

        let mut payload = Map::new();
        payload.insert("a".to_string(), Value::from(1));
        let result = handler(payload).await.unwrap();
        assert_eq!(result, Value::from(1));
    }

    #[tokio::test]
    async fn handler_fn_propagates_error() {
        let handler = handler_fn(|_payload| async move {
            Err::<Value, _>(ExternalOperationError::new("sheets", "HTTP 503"))
        });

        let err = handler(Map::new()).await.unwrap_err();
        assert_eq!(err.service, "sheets");
    }
}
