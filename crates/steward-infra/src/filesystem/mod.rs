//! Filesystem adapters for Steward.
//!
//! Data directory layout helpers and the file-backed retry store.

pub mod retry_store;

use std::path::{Path, PathBuf};

pub use retry_store::FileRetryStore;

/// Default retry store directory: `{data_dir}/retry_queue/`.
pub fn retry_queue_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("retry_queue")
}

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `STEWARD_DATA_DIR` environment variable
/// 2. `~/.steward` under the user's home directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("STEWARD_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".steward");
    }

    // Last resort: current directory
    PathBuf::from(".steward")
}
