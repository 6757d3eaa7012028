mod helpers;

use chrono::{Duration, Utc};
use helpers::test_config;
use serde_json::json;
use tempfile::TempDir;
use triai::application::Runtime;
use triai::domain::models::BackendKind;
use triai::services::ToolContext;

fn sqlite_config(dir: &TempDir) -> triai::Config {
    let mut config = test_config();
    config.database.backend = BackendKind::Sqlite;
    config.database.url = format!("sqlite:{}", dir.path().join("state").join("triai.db").display());
    config
}

#[tokio::test]
async fn test_sqlite_state_survives_reconnect() {
    let dir = TempDir::new().unwrap();

    let runtime = Runtime::connect(sqlite_config(&dir)).await.unwrap();
    let first = runtime.prepare().await.unwrap();
    assert_eq!(first.migrations_applied, 2);
    runtime
        .broker()
        .send_message(helpers::USER, "DataAnalyst", "Summarize revenue by region")
        .await
        .unwrap();
    runtime.close().await;

    let runtime = Runtime::connect(sqlite_config(&dir)).await.unwrap();
    let second = runtime.prepare().await.unwrap();
    assert_eq!(second.migrations_applied, 0);
    assert_eq!(runtime.agents().await.unwrap().len(), 3);

    let history = runtime
        .broker()
        .history(helpers::USER, "DataAnalyst", 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].is_unread());
    runtime.close().await;
}

#[tokio::test]
async fn test_memory_sweep_purges_expired_entries() {
    let dir = TempDir::new().unwrap();
    let runtime = Runtime::connect(sqlite_config(&dir)).await.unwrap();
    runtime.prepare().await.unwrap();

    let catalog = runtime.broker().catalog().clone();
    let ctx = ToolContext::new("ReportGen");
    let expired_at = (Utc::now() - Duration::hours(1)).to_rfc3339();
    for (label, purge_after) in [("stale", Some(expired_at)), ("fresh", None)] {
        let mut params = json!({
            "memory_label": label,
            "memory_content": format!("{label} note"),
            "related_to_tags": "weekly"
        });
        if let Some(at) = purge_after {
            params["purge_after"] = json!(at);
        }
        assert!(catalog.dispatch(&ctx, "store_memory", &params).await.success);
    }

    let purged = runtime.memory_sweep().run_once().await.unwrap();
    assert_eq!(purged, 1);

    let left = runtime.broker().agent_memories("ReportGen", 10).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].label, "fresh");
    runtime.close().await;
}

#[tokio::test]
async fn test_sqlite_without_url_is_refused() {
    let mut config = test_config();
    config.database.backend = BackendKind::Sqlite;
    config.database.url = String::new();
    assert!(Runtime::connect(config).await.is_err());
}
