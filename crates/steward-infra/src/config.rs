//! Configuration loader for Steward.
//!
//! Reads `config.toml` from the data directory (`~/.steward/` in production)
//! and deserializes it into [`StewardConfig`]. The lenient loader falls back
//! to defaults when the file is missing or malformed; the strict loader
//! reports the failure instead.

use std::path::{Path, PathBuf};

use steward_types::config::StewardConfig;
use steward_types::error::ConfigError;

use crate::filesystem::retry_queue_dir;
use crate::sqlite::pool::database_url_for;

/// Path of the config file inside `data_dir`.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`StewardConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config; missing fields take their defaults.
pub async fn load_config(data_dir: &Path) -> StewardConfig {
    match load_config_strict(data_dir).await {
        Ok(Some(config)) => config,
        Ok(None) => {
            tracing::debug!(
                "No config.toml found in {}, using defaults",
                data_dir.display()
            );
            StewardConfig::default()
        }
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            StewardConfig::default()
        }
    }
}

/// Load configuration, surfacing read and parse failures.
///
/// Returns `Ok(None)` when the file does not exist.
pub async fn load_config_strict(data_dir: &Path) -> Result<Option<StewardConfig>, ConfigError> {
    let path = config_path(data_dir);

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                message: err.to_string(),
            });
        }
    };

    toml::from_str::<StewardConfig>(&content)
        .map(Some)
        .map_err(|err| ConfigError::Parse {
            path: path.display().to_string(),
            message: err.to_string(),
        })
}

/// Directory for the file retry store: `retry.storage_dir`, else
/// `{data_dir}/retry_queue`.
pub fn resolve_retry_dir(config: &StewardConfig, data_dir: &Path) -> PathBuf {
    config
        .retry
        .storage_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| retry_queue_dir(data_dir))
}

/// Database URL: `memory.database_url`, else `{data_dir}/steward.db`.
pub fn resolve_database_url(config: &StewardConfig, data_dir: &Path) -> String {
    config
        .memory
        .database_url
        .clone()
        .unwrap_or_else(|| database_url_for(data_dir))
}
