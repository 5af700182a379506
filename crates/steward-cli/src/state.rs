//! Application state wiring the Steward components together.
//!
//! The core components are generic over their storage ports; AppState pins
//! them to the concrete infra implementations selected by configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use steward_core::memory::MemoryManager;
use steward_core::retry::{RetryQueue, RetryStore};
use steward_infra::cache::ShortTermCache;
use steward_infra::config::{load_config, resolve_database_url, resolve_retry_dir};
use steward_infra::crypto::hash::Sha256ContentHasher;
use steward_infra::filesystem::{FileRetryStore, resolve_data_dir};
use steward_infra::sqlite::{DatabasePool, SqliteLongTermStore, SqliteRetryStore};
use steward_types::config::{RetryStoreKind, StewardConfig};
use steward_types::error::RepositoryError;
use steward_types::retry::{DeadLetter, RetryOperation};
use uuid::Uuid;

/// Retry store selected by `retry.store`.
#[derive(Debug, Clone)]
pub enum RetryBackend {
    Sqlite(SqliteRetryStore),
    File(FileRetryStore),
}

impl RetryStore for RetryBackend {
    async fn save(&self, operation: &RetryOperation) -> Result<(), RepositoryError> {
        match self {
            Self::Sqlite(store) => store.save(operation).await,
            Self::File(store) => store.save(operation).await,
        }
    }

    async fn remove(&self, id: &Uuid) -> Result<(), RepositoryError> {
        match self {
            Self::Sqlite(store) => store.remove(id).await,
            Self::File(store) => store.remove(id).await,
        }
    }

    async fn load_active(&self) -> Result<Vec<RetryOperation>, RepositoryError> {
        match self {
            Self::Sqlite(store) => store.load_active().await,
            Self::File(store) => store.load_active().await,
        }
    }

    async fn write_dead_letter(&self, letter: &DeadLetter) -> Result<(), RepositoryError> {
        match self {
            Self::Sqlite(store) => store.write_dead_letter(letter).await,
            Self::File(store) => store.write_dead_letter(letter).await,
        }
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>, RepositoryError> {
        match self {
            Self::Sqlite(store) => store.list_dead_letters().await,
            Self::File(store) => store.list_dead_letters().await,
        }
    }

    fn location(&self) -> String {
        match self {
            Self::Sqlite(store) => store.location(),
            Self::File(store) => store.location(),
        }
    }
}

/// Concrete type aliases for the component generics pinned to infra implementations.
pub type ConcreteMemoryManager = MemoryManager<ShortTermCache, SqliteLongTermStore>;
pub type ConcreteRetryQueue = RetryQueue<RetryBackend>;

/// Shared application state for CLI commands.
#[derive(Clone)]
pub struct AppState {
    pub config: StewardConfig,
    pub data_dir: PathBuf,
    pub memory: Arc<ConcreteMemoryManager>,
    pub retry_queue: ConcreteRetryQueue,
    /// Short-term backend name, `None` when it is unavailable.
    pub short_term_kind: Option<&'static str>,
}

impl AppState {
    /// Initialize the application state: load config, open stores, wire components.
    ///
    /// An unreachable database degrades long-term memory; it is only fatal
    /// when the SQLite retry store is selected.
    pub async fn init(data_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let data_dir = data_dir.unwrap_or_else(resolve_data_dir);

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let config = load_config(&data_dir).await;

        let db_url = resolve_database_url(&config, &data_dir);
        let db_pool = match DatabasePool::new(&db_url).await {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::warn!(url = %db_url, error = %e, "database unavailable");
                None
            }
        };

        let retry_store = match config.retry.store {
            RetryStoreKind::Sqlite => {
                let pool = db_pool
                    .clone()
                    .with_context(|| format!("retry store requires the database at {db_url}"))?;
                RetryBackend::Sqlite(SqliteRetryStore::new(pool))
            }
            RetryStoreKind::File => {
                let dir = resolve_retry_dir(&config, &data_dir);
                let store = FileRetryStore::open(&dir)
                    .await
                    .with_context(|| format!("failed to open retry store at {}", dir.display()))?;
                RetryBackend::File(store)
            }
        };
        let retry_queue = RetryQueue::new(retry_store, &config.retry);

        let short_term = ShortTermCache::from_config(&config.memory).await;
        let short_term_kind = short_term.as_ref().map(ShortTermCache::kind);
        let long_term = db_pool.map(SqliteLongTermStore::new);
        let memory = MemoryManager::new(
            config.memory.clone(),
            short_term,
            long_term,
            Arc::new(Sha256ContentHasher::new()),
        );

        Ok(Self {
            config,
            data_dir,
            memory: Arc::new(memory),
            retry_queue,
            short_term_kind,
        })
    }
}
