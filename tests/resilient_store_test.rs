mod helpers;

use helpers::{capture_logs, mock_store};
use triai::adapters::mock::Fault;
use triai::domain::models::value::row;
use triai::domain::models::{Columns, Row, SqlValue};
use triai::domain::StoreError;

async fn create_target(store: &triai::services::ResilientStore) {
    store
        .execute_write("CREATE TABLE load_target (id INTEGER, label TEXT, note TEXT)")
        .await
        .expect("create table");
}

#[tokio::test]
async fn test_bulk_write_splits_into_chunks() {
    let (store, backend) = mock_store(3).await;
    create_target(&store).await;
    backend.clear_journal().await;

    let rows: Vec<Row> = (0..1203_i64)
        .map(|i| row([("id", SqlValue::from(i)), ("label", SqlValue::from(format!("row {i}")))]))
        .collect();
    let report = store.bulk_write("load_target", rows, None).await.unwrap();

    assert_eq!(report.chunks, vec![500, 500, 203]);
    assert_eq!(report.rows_written, 1203);
    assert_eq!(backend.statements_starting_with("INSERT").await.len(), 3);

    let count = store
        .execute_read("SELECT COUNT(*) AS n FROM load_target")
        .await
        .unwrap();
    assert_eq!(count[0]["n"].as_i64(), Some(1203));
}

#[tokio::test]
async fn test_bulk_write_accepts_columns_and_fills_nulls() {
    let (store, _backend) = mock_store(3).await;
    create_target(&store).await;

    let mut columns = Columns::new();
    columns.insert("id".into(), vec![1_i64.into(), 2_i64.into(), 3_i64.into()]);
    columns.insert("label".into(), vec!["a".into(), "b".into()]);
    let report = store.bulk_write("load_target", columns, Some(2)).await.unwrap();
    assert_eq!(report.chunks, vec![2, 1]);

    let rows = store
        .execute_read("SELECT id, label, note FROM load_target ORDER BY id")
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2]["label"], SqlValue::Null);
    assert_eq!(rows[0]["note"], SqlValue::Null);
}

#[tokio::test]
async fn test_hostile_text_is_stored_verbatim() {
    let (store, _backend) = mock_store(3).await;
    create_target(&store).await;

    let hostile = "O'Brien'); DROP TABLE load_target; --";
    store
        .bulk_write("load_target", vec![row([("id", SqlValue::from(1_i64)), ("note", hostile.into())])], None)
        .await
        .unwrap();

    let rows = store.execute_read("SELECT note FROM load_target").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["note"].as_str(), Some(hostile));
}

#[tokio::test]
async fn test_retries_are_logged_and_recover() {
    let (store, backend) = mock_store(3).await;
    backend.inject(Fault::Transient("connection reset".into()), 2).await;

    let (logs, _guard) = capture_logs();
    let rows = store.execute_read("SELECT COUNT(*) AS n FROM customers").await.unwrap();
    assert_eq!(rows[0]["n"].as_i64(), Some(5));

    let output = logs.contents();
    assert_eq!(output.matches("transient storage failure, retrying statement").count(), 2);
    assert!(output.contains("attempt=1"));
    assert!(output.contains("attempt=2"));
    assert!(output.contains("connection reset"));
    assert_eq!(backend.pending_faults().await, 0);
}

#[tokio::test]
async fn test_retry_ceiling_surfaces_store_error() {
    let (store, backend) = mock_store(2).await;
    backend.inject(Fault::Transient("server closed the connection".into()), 5).await;

    let (logs, _guard) = capture_logs();
    let err = store.execute_read("SELECT 1 AS one").await.unwrap_err();
    match err {
        StoreError::RetriesExhausted { attempts, statement, .. } => {
            assert_eq!(attempts, 3);
            assert_eq!(statement, "SELECT 1 AS one");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let output = logs.contents();
    let retry_lines: Vec<&str> = output
        .lines()
        .filter(|line| line.contains("retrying statement"))
        .collect();
    assert_eq!(retry_lines.len(), 2);
    assert!(retry_lines.iter().all(|line| line.contains("SELECT 1 AS one")));
    assert!(output.contains("retry ceiling reached"));
    // Three attempts consumed three faults.
    assert_eq!(backend.pending_faults().await, 2);
}

#[tokio::test]
async fn test_statement_fault_is_not_retried() {
    let (store, backend) = mock_store(3).await;
    create_target(&store).await;

    let rows: Vec<Row> = (0..5_i64).map(|i| row([("id", SqlValue::from(i))])).collect();
    store.bulk_write("load_target", rows[..2].to_vec(), None).await.unwrap();

    backend.inject(Fault::Statement("constraint failed".into()), 2).await;
    let err = store.bulk_write("load_target", rows[2..].to_vec(), None).await;
    assert!(matches!(err, Err(StoreError::Statement { .. })));
    assert_eq!(backend.pending_faults().await, 1);

    let count = store.execute_read("SELECT COUNT(*) AS n FROM load_target").await;
    assert!(matches!(count, Err(StoreError::Statement { .. })));
    let count = store.execute_read("SELECT COUNT(*) AS n FROM load_target").await.unwrap();
    assert_eq!(count[0]["n"].as_i64(), Some(2));
}
