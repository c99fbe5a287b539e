//! Contract tests for the Database surface.
//!
//! Tests:
//! - Query/exec round trips through the worker
//! - Invalidation fan-out on exec
//! - Durable storage across reopen
//! - Export/import snapshots
//! - Close semantics (context loss, never a hang)

mod common;

use weir::{Database, DatabaseConfig, Error, TableSet, Value};

async fn open_memory() -> Database {
    Database::open(DatabaseConfig::new("test"))
        .await
        .expect("open failed")
}

#[tokio::test]
async fn test_exec_and_query_roundtrip() {
    let db = open_memory().await;
    db.exec("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", vec![])
        .await
        .unwrap();

    let outcome = db
        .exec(
            "INSERT INTO users (name) VALUES (?)",
            vec![Value::from("ada")],
        )
        .await
        .unwrap();
    assert_eq!(outcome.changes, 1);
    assert_eq!(outcome.last_insert_id, Some(1));

    let rows = db
        .query("SELECT name FROM users WHERE id = ?", vec![Value::from(1)])
        .await
        .unwrap();
    assert_eq!(rows.columns, vec!["name"]);
    assert_eq!(rows.rows, vec![vec![Value::from("ada")]]);
}

#[tokio::test]
async fn test_engine_error_rejects_operation() {
    let db = open_memory().await;
    let err = db.query("SELECT * FROM missing", vec![]).await.unwrap_err();
    match err {
        Error::Engine { message, .. } => assert!(message.contains("missing")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_exec_publishes_extracted_tables() {
    let db = open_memory().await;
    db.exec("CREATE TABLE notes (body TEXT)", vec![]).await.unwrap();

    let (handler, seen) = common::recording_handler();
    let _sub = db.on_invalidate(handler);

    db.exec("INSERT INTO notes (body) VALUES (?)", vec![Value::from("hi")])
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.as_slice(), &[TableSet::named(["notes"])]);
}

#[tokio::test]
async fn test_query_does_not_publish() {
    let db = open_memory().await;
    db.exec("CREATE TABLE notes (body TEXT)", vec![]).await.unwrap();

    let (handler, seen) = common::recording_handler();
    let _sub = db.on_invalidate(handler);

    db.query("SELECT * FROM notes", vec![]).await.unwrap();
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_file_storage_persists_across_reopen() {
    let fixture = common::TestFixture::new();

    let config = DatabaseConfig::new("durable").file(&fixture.db_path);
    let db = Database::open(config.clone()).await.unwrap();
    db.exec("CREATE TABLE t (v TEXT)", vec![]).await.unwrap();
    db.exec("INSERT INTO t VALUES (?)", vec![Value::from("kept")])
        .await
        .unwrap();
    db.close().await.unwrap();

    let db = Database::open(config).await.unwrap();
    let rows = db.query("SELECT v FROM t", vec![]).await.unwrap();
    assert_eq!(rows.rows, vec![vec![Value::from("kept")]]);
}

#[tokio::test]
async fn test_export_import_roundtrip() {
    let db = open_memory().await;
    db.exec("CREATE TABLE t (v TEXT)", vec![]).await.unwrap();
    db.exec("INSERT INTO t VALUES ('snapshot')", vec![])
        .await
        .unwrap();

    let bytes = db.export().await.unwrap();
    assert!(!bytes.is_empty());

    let other = open_memory().await;
    let (handler, seen) = common::recording_handler();
    let _sub = other.on_invalidate(handler);

    other.import(bytes).await.unwrap();

    // Import invalidates everything.
    assert_eq!(seen.lock().unwrap().as_slice(), &[TableSet::All]);

    let rows = other.query("SELECT v FROM t", vec![]).await.unwrap();
    assert_eq!(rows.rows, vec![vec![Value::from("snapshot")]]);
}

#[tokio::test]
async fn test_requests_after_close_fail_with_context_loss() {
    let db = open_memory().await;
    db.close().await.unwrap();

    let err = db.query("SELECT 1", vec![]).await.unwrap_err();
    assert!(matches!(err, Error::ContextLost));

    // Closing again also reports context loss rather than hanging.
    let err = db.close().await.unwrap_err();
    assert!(matches!(err, Error::ContextLost));
}

#[tokio::test]
async fn test_pragmas_applied_at_open() {
    let db = Database::open(DatabaseConfig::new("test").pragma("foreign_keys", "ON"))
        .await
        .unwrap();
    let rows = db.query("PRAGMA foreign_keys", vec![]).await.unwrap();
    assert_eq!(rows.rows[0][0], Value::Integer(1));
}

#[tokio::test]
async fn test_ordering_within_one_caller() {
    let db = open_memory().await;
    db.exec("CREATE TABLE seq (n INTEGER)", vec![]).await.unwrap();
    for n in 0..20i64 {
        db.exec("INSERT INTO seq (n) VALUES (?)", vec![Value::from(n)])
            .await
            .unwrap();
    }
    let rows = db.query("SELECT n FROM seq ORDER BY rowid", vec![]).await.unwrap();
    let got: Vec<_> = rows.rows.iter().map(|r| r[0].clone()).collect();
    let want: Vec<_> = (0..20i64).map(Value::from).collect();
    assert_eq!(got, want);
}
