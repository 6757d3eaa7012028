//! Infrastructure adapters for external systems.

pub mod generators;
pub mod mcp;
pub mod mock;
pub mod postgres;
pub mod sql;
pub mod sqlite;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::domain::models::{BackendKind, DatabaseConfig};
use crate::domain::ports::StorageBackend;
use crate::infrastructure::logging::scrub_secrets;

#[derive(Debug, Error)]
pub enum BackendConnectError {
    #[error("Database URL is required for the {0} backend")]
    MissingUrl(BackendKind),
    #[error(transparent)]
    Sqlite(#[from] sqlite::ConnectionError),
    #[error("Failed to connect to postgres: {0}")]
    Postgres(#[source] sqlx::Error),
}

/// Build the storage backend selected by `config.backend`.
///
/// The choice is made once here; nothing downstream inspects which backend it got.
pub async fn connect_backend(
    config: &DatabaseConfig,
) -> Result<Arc<dyn StorageBackend>, BackendConnectError> {
    let acquire_timeout = Duration::from_secs(config.acquire_timeout_secs);
    let backend: Arc<dyn StorageBackend> = match config.backend {
        BackendKind::Mock => Arc::new(mock::MockBackend::new().await?),
        BackendKind::Sqlite => {
            let url = required_url(config)?;
            let pool_config = sqlite::PoolConfig {
                max_connections: config.max_connections,
                acquire_timeout,
                ..sqlite::PoolConfig::default()
            };
            Arc::new(sqlite::SqliteBackend::connect(url, &pool_config).await?)
        }
        BackendKind::Postgres => {
            let url = required_url(config)?;
            Arc::new(
                postgres::PostgresBackend::connect(url, config.max_connections, acquire_timeout)
                    .await
                    .map_err(BackendConnectError::Postgres)?,
            )
        }
    };
    info!(
        backend = %config.backend,
        url = %scrub_secrets(&config.url),
        "storage backend connected"
    );
    Ok(backend)
}

fn required_url(config: &DatabaseConfig) -> Result<&str, BackendConnectError> {
    let url = config.url.trim();
    if url.is_empty() {
        Err(BackendConnectError::MissingUrl(config.backend))
    } else {
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_backend_needs_no_url() {
        let backend = connect_backend(&DatabaseConfig::default()).await.unwrap();
        assert_eq!(backend.kind(), BackendKind::Mock);
    }

    #[tokio::test]
    async fn test_sqlite_requires_url() {
        let config = DatabaseConfig {
            backend: BackendKind::Sqlite,
            url: String::new(),
            ..DatabaseConfig::default()
        };
        let err = connect_backend(&config).await.err().unwrap();
        assert!(matches!(err, BackendConnectError::MissingUrl(BackendKind::Sqlite)));
    }

    #[tokio::test]
    async fn test_sqlite_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("triai.db").display());
        let config = DatabaseConfig {
            backend: BackendKind::Sqlite,
            url,
            ..DatabaseConfig::default()
        };
        let backend = connect_backend(&config).await.unwrap();
        assert_eq!(backend.kind(), BackendKind::Sqlite);
        assert!(backend.ping().await.is_ok());
    }
}
