//! File-backed retry queue store.
//!
//! Layout under the storage directory:
//! ```text
//! {dir}/{operation_id}.json              active operation
//! {dir}/dead_letters/{record_id}.json    dead letter
//! {dir}/corrupted_{name}                 unreadable record set aside on load
//! ```
//!
//! Every write goes to a temporary file that is synced and then renamed over
//! the target, so a crash leaves either the old or the new record.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use steward_core::retry::RetryStore;
use steward_types::error::RepositoryError;
use steward_types::retry::{DeadLetter, RetryOperation};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const DEAD_LETTER_DIR: &str = "dead_letters";
const CORRUPTED_PREFIX: &str = "corrupted_";

/// Implementation of `RetryStore` using one JSON file per record.
#[derive(Debug, Clone)]
pub struct FileRetryStore {
    root: PathBuf,
}

impl FileRetryStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let root = dir.into();
        tokio::fs::create_dir_all(root.join(DEAD_LETTER_DIR))
            .await
            .map_err(|e| RepositoryError::Io(format!("create {}: {e}", root.display())))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn operation_path(&self, id: &Uuid) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn dead_letter_dir(&self) -> PathBuf {
        self.root.join(DEAD_LETTER_DIR)
    }

    async fn set_aside(&self, path: &Path, name: &str) {
        let target = self.root.join(format!("{CORRUPTED_PREFIX}{name}"));
        if let Err(e) = tokio::fs::rename(path, &target).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to set aside unreadable retry record");
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), RepositoryError> {
    let tmp = path.with_extension(format!("{}.tmp", Uuid::now_v7().simple()));
    let io_err = |e: std::io::Error| RepositoryError::Io(format!("{}: {e}", path.display()));

    let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err)?;
    file.write_all(bytes).await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(e));
    }
    Ok(())
}

/// Record files: `*.json`, excluding temporaries and set-aside records.
fn is_record_file(name: &str) -> bool {
    name.ends_with(".json") && !name.starts_with(CORRUPTED_PREFIX)
}

async fn json_files(dir: &Path) -> Result<Vec<(PathBuf, String)>, RepositoryError> {
    let io_err = |e: std::io::Error| RepositoryError::Io(format!("{}: {e}", dir.display()));
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let file_type = entry.file_type().await.map_err(io_err)?;
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_record_file(&name) {
            files.push((entry.path(), name));
        }
    }
    Ok(files)
}

// ---------------------------------------------------------------------------
// RetryStore implementation
// ---------------------------------------------------------------------------

impl RetryStore for FileRetryStore {
    async fn save(&self, operation: &RetryOperation) -> Result<(), RepositoryError> {
        let bytes = serde_json::to_vec_pretty(operation)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize operation: {e}")))?;
        write_atomic(&self.operation_path(&operation.id), &bytes).await
    }

    async fn remove(&self, id: &Uuid) -> Result<(), RepositoryError> {
        let path = self.operation_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RepositoryError::Io(format!("{}: {e}", path.display()))),
        }
    }

    async fn load_active(&self) -> Result<Vec<RetryOperation>, RepositoryError> {
        let mut operations = Vec::new();

        for (path, name) in json_files(&self.root).await? {
            let parsed = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<RetryOperation>(&bytes).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match parsed {
                Ok(op) => operations.push(op),
                Err(error) => {
                    tracing::warn!(file = %name, %error, "unreadable retry record, setting aside");
                    self.set_aside(&path, &name).await;
                }
            }
        }

        operations.sort_by_key(|op| op.next_retry_at);
        Ok(operations)
    }

    async fn write_dead_letter(&self, letter: &DeadLetter) -> Result<(), RepositoryError> {
        let path = self
            .dead_letter_dir()
            .join(format!("{}.json", letter.record_id()));
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(RepositoryError::Conflict(format!(
                "dead letter {} already exists",
                letter.record_id()
            )));
        }

        let bytes = serde_json::to_vec_pretty(letter)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize dead letter: {e}")))?;
        write_atomic(&path, &bytes).await?;
        self.remove(&letter.operation.id).await
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>, RepositoryError> {
        let mut letters = Vec::new();

        for (path, name) in json_files(&self.dead_letter_dir()).await? {
            let parsed = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<DeadLetter>(&bytes).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match parsed {
                Ok(letter) => letters.push(letter),
                Err(error) => tracing::warn!(file = %name, %error, "skipping unreadable dead letter"),
            }
        }

        letters.sort_by_key(|l| l.failed_at);
        Ok(letters)
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::{Map, Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use steward_core::handler::handler_fn;
    use steward_core::retry::{RetryPolicy, RetryQueue};
    use steward_types::error::ExternalOperationError;

    fn operation(name: &str, offset_secs: i64) -> RetryOperation {
        let now = Utc::now();
        let mut payload = Map::new();
        payload.insert("rows".to_string(), json!([["a", 1]]));
        RetryOperation {
            id: Uuid::now_v7(),
            operation: name.to_string(),
            payload,
            last_error: "HTTP 503".to_string(),
            attempt: 1,
            max_attempts: 3,
            next_retry_at: now + Duration::seconds(offset_secs),
            created_at: now,
            last_attempt_at: None,
        }
    }

    #[tokio::test]
    async fn test_open_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileRetryStore::open(tmp.path().join("retry_queue")).await.unwrap();
        assert!(store.root().is_dir());
        assert!(store.root().join(DEAD_LETTER_DIR).is_dir());
        assert_eq!(store.location(), tmp.path().join("retry_queue").display().to_string());
    }

    #[tokio::test]
    async fn test_save_load_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileRetryStore::open(tmp.path()).await.unwrap();
        let later = operation("sheets.append_rows", 600);
        let sooner = operation("scraper.fetch", 60);
        store.save(&later).await.unwrap();
        store.save(&sooner).await.unwrap();

        let loaded = store.load_active().await.unwrap();
        assert_eq!(loaded, vec![sooner.clone(), later.clone()]);

        store.remove(&sooner.id).await.unwrap();
        store.remove(&sooner.id).await.unwrap();
        assert_eq!(store.load_active().await.unwrap(), vec![later]);
    }

    #[tokio::test]
    async fn test_save_overwrites_record() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileRetryStore::open(tmp.path()).await.unwrap();
        let mut op = operation("sheets.append_rows", 60);
        store.save(&op).await.unwrap();
        op.attempt = 2;
        store.save(&op).await.unwrap();

        let loaded = store.load_active().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].attempt, 2);

        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_corrupted_record_is_set_aside() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileRetryStore::open(tmp.path()).await.unwrap();
        store.save(&operation("scraper.fetch", 0)).await.unwrap();
        std::fs::write(tmp.path().join("broken.json"), b"{not json").unwrap();
        std::fs::write(tmp.path().join("half.json.0192.tmp"), b"{").unwrap();

        let loaded = store.load_active().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(tmp.path().join("corrupted_broken.json").exists());
        assert!(!tmp.path().join("broken.json").exists());

        // Set-aside records are not retried on the next load.
        assert_eq!(store.load_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dead_letter_moves_record() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileRetryStore::open(tmp.path()).await.unwrap();
        let op = operation("sheets.append_rows", 0);
        store.save(&op).await.unwrap();

        let letter = DeadLetter::new(op.clone(), "quota exceeded");
        store.write_dead_letter(&letter).await.unwrap();

        assert!(store.load_active().await.unwrap().is_empty());
        let path = tmp
            .path()
            .join(DEAD_LETTER_DIR)
            .join(format!("{}.json", letter.record_id()));
        assert!(path.exists());

        let letters = store.list_dead_letters().await.unwrap();
        assert_eq!(letters, vec![letter.clone()]);

        let err = store.write_dead_letter(&letter).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_pending_operation_survives_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));

        {
            let store = FileRetryStore::open(tmp.path()).await.unwrap();
            let queue = RetryQueue::with_policy(
                store,
                RetryPolicy::new(std::time::Duration::from_secs(3600), 3),
                3,
                std::time::Duration::from_millis(20),
            );
            queue.register(
                "sheets.append_rows",
                handler_fn(|_payload| async move {
                    Err::<Value, _>(ExternalOperationError::new("sheets", "unreachable"))
                }),
            );
            queue
                .submit(
                    "sheets.append_rows",
                    Map::new(),
                    "HTTP 503",
                    None,
                    Some(Utc::now() + Duration::hours(1)),
                )
                .await
                .unwrap();
            queue.stop().await;
        }

        let store = FileRetryStore::open(tmp.path()).await.unwrap();
        let mut persisted = store.load_active().await.unwrap();
        assert_eq!(persisted.len(), 1);

        // Make the persisted record due, then restart a fresh queue on it.
        persisted[0].next_retry_at = Utc::now() - Duration::seconds(1);
        store.save(&persisted[0]).await.unwrap();

        let queue = RetryQueue::with_policy(
            store.clone(),
            RetryPolicy::new(std::time::Duration::from_secs(3600), 3),
            3,
            std::time::Duration::from_millis(20),
        );
        let seen = calls.clone();
        queue.register(
            "sheets.append_rows",
            handler_fn(move |_payload: Map<String, Value>| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"appended": 1}))
                }
            }),
        );
        let loaded = queue.start().await.unwrap();
        assert_eq!(loaded, 1);

        for _ in 0..200 {
            if queue.stats().pending_count == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        queue.stop().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.load_active().await.unwrap().is_empty());
        assert!(store.list_dead_letters().await.unwrap().is_empty());
    }
}
