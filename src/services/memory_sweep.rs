//! Background sweep that deletes expired agent memories.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::MaintenanceConfig;
use crate::domain::ports::MemoryRepository;

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    pub run_on_startup: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self::from(&MaintenanceConfig::default())
    }
}

impl From<&MaintenanceConfig> for SweepConfig {
    fn from(config: &MaintenanceConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
            run_on_startup: config.sweep_on_startup,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStatus {
    pub running: bool,
    pub runs: u64,
    pub total_purged: u64,
    pub consecutive_failures: u32,
    pub last_run: Option<DateTime<Utc>>,
}

/// Controls a spawned sweep.
#[derive(Clone)]
pub struct SweepHandle {
    stop_flag: Arc<AtomicBool>,
    wake: Arc<Notify>,
    status: Arc<RwLock<SweepStatus>>,
}

impl SweepHandle {
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> SweepStatus {
        self.status.read().await.clone()
    }
}

pub struct MemorySweep {
    memories: Arc<dyn MemoryRepository>,
    config: SweepConfig,
    handle: SweepHandle,
}

impl MemorySweep {
    pub fn new(memories: Arc<dyn MemoryRepository>, config: SweepConfig) -> Self {
        Self {
            memories,
            config,
            handle: SweepHandle {
                stop_flag: Arc::new(AtomicBool::new(false)),
                wake: Arc::new(Notify::new()),
                status: Arc::new(RwLock::new(SweepStatus::default())),
            },
        }
    }

    pub fn handle(&self) -> SweepHandle {
        self.handle.clone()
    }

    /// Run on a background task until [`SweepHandle::stop`] is called.
    pub fn spawn(self) -> (SweepHandle, JoinHandle<()>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run_loop()))
    }

    async fn run_loop(self) {
        self.handle.status.write().await.running = true;
        info!(interval_secs = self.config.interval.as_secs(), "memory sweep started");

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        if self.config.run_on_startup {
            self.run_cycle().await;
        }

        while !self.handle.is_stop_requested() {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.handle.is_stop_requested() {
                        break;
                    }
                    self.run_cycle().await;
                }
                () = self.handle.wake.notified() => {}
            }
        }

        self.handle.status.write().await.running = false;
        info!("memory sweep stopped");
    }

    async fn run_cycle(&self) {
        let outcome = self.run_once().await;
        let mut status = self.handle.status.write().await;
        status.runs += 1;
        status.last_run = Some(Utc::now());
        match outcome {
            Ok(purged) => {
                status.consecutive_failures = 0;
                status.total_purged += purged;
                if purged > 0 {
                    info!(purged, "expired memories purged");
                } else {
                    debug!("no expired memories");
                }
            }
            Err(err) => {
                status.consecutive_failures += 1;
                warn!(
                    error = %err,
                    consecutive_failures = status.consecutive_failures,
                    "memory sweep failed"
                );
            }
        }
    }

    /// Purge once, outside the schedule.
    pub async fn run_once(&self) -> DomainResult<u64> {
        self.memories.purge_expired(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockBackend;
    use crate::adapters::sql::{Migrator, SqlMemoryRepository};
    use crate::domain::models::{NewMemory, TagSet};
    use crate::services::retry::RetryPolicy;
    use crate::services::ResilientStore;

    async fn repository() -> Arc<SqlMemoryRepository> {
        let backend = Arc::new(MockBackend::empty().await.unwrap());
        let store = ResilientStore::new(backend, RetryPolicy::new(1, 1, 1));
        Migrator::new(store.clone()).run().await.unwrap();
        Arc::new(SqlMemoryRepository::new(store))
    }

    #[test]
    fn test_config_from_maintenance() {
        let config = SweepConfig::from(&MaintenanceConfig::default());
        assert_eq!(config.interval, Duration::from_secs(300));
        assert!(config.run_on_startup);
    }

    #[tokio::test]
    async fn test_startup_sweep_purges_and_stops() {
        let repo = repository().await;
        repo.store(NewMemory {
            agent: "QueryBot".into(),
            label: "stale".into(),
            body: String::new(),
            tags: TagSet::parse("tmp"),
            expires_at: Some(Utc::now() - chrono::Duration::minutes(5)),
        })
        .await
        .unwrap();

        let sweep = MemorySweep::new(
            repo,
            SweepConfig {
                interval: Duration::from_secs(3600),
                run_on_startup: true,
            },
        );
        let (handle, task) = sweep.spawn();

        for _ in 0..100 {
            if handle.status().await.runs > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.stop();
        task.await.unwrap();

        let status = handle.status().await;
        assert_eq!(status.runs, 1);
        assert_eq!(status.total_purged, 1);
        assert!(!status.running);
    }
}
