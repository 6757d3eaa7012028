//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use triai::adapters::mock::MockBackend;
use triai::application::Runtime;
use triai::domain::models::{BackendKind, Config};
use triai::domain::ports::StorageBackend;
use triai::services::{ResilientStore, RetryPolicy};

pub const USER: &str = "alice";

/// Defaults with the mock backend, a fixed user and quick retries.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.database.backend = BackendKind::Mock;
    config.server.host = "127.0.0.1".to_string();
    config.server.current_user = USER.to_string();
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    config.agents.reconnect.max_attempts = 2;
    config.agents.reconnect.delay_ms = 10;
    config
}

pub async fn mock_store(max_retries: u32) -> (ResilientStore, Arc<MockBackend>) {
    let backend = Arc::new(MockBackend::new().await.expect("mock backend"));
    let dyn_backend: Arc<dyn StorageBackend> = backend.clone();
    let store = ResilientStore::new(dyn_backend, RetryPolicy::new(max_retries, 1, 5));
    (store, backend)
}

/// A prepared runtime over an observable mock backend.
pub struct Harness {
    pub runtime: Runtime,
    pub backend: Arc<MockBackend>,
}

pub async fn harness() -> Harness {
    harness_with(test_config()).await
}

pub async fn harness_with(config: Config) -> Harness {
    let (store, backend) = mock_store(config.retry.max_retries).await;
    let runtime = Runtime::with_store(config, store);
    runtime.prepare().await.expect("prepare");
    Harness { runtime, backend }
}

/// `io::Write` sink shared with a tracing fmt layer.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut bytes) = self.0.lock() {
            bytes.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Install a thread-local subscriber writing plain text into the returned sink.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}
