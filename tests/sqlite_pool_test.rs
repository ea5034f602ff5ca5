//! Integration tests for self-managed SQLite pools through sqlx.
//!
//! Tests verify that:
//! - Pools open against a real database file and are validated
//! - Work done with autocommit off survives only an explicit commit
//! - Work left open when a connection is closed is rolled back
//! - The probe reports a healthy, balanced run

use hosted_pool::config::PoolSpec;
use hosted_pool::db::{
    BorrowRequest, DbConnection, EnvironmentDetector, LocalTransactionManager, PhysicalConnection,
    PhysicalPool, PoolConnector, PoolEngine, SqlxConnection, SqlxConnector,
};
use hosted_pool::models::{Credentials, EnvironmentKind, PoolDefinition};
use hosted_pool::probe::run_probe;
use hosted_pool::{ConnectionHandle, PoolError};
use std::sync::Arc;
use tempfile::TempDir;

fn sqlite_definition(dir: &TempDir, query: &str) -> PoolDefinition {
    let path = dir.path().join("app.db");
    PoolSpec::parse(&format!("APPDB=sqlite:{}{}", path.display(), query)).unwrap()
}

fn engine(definition: PoolDefinition) -> PoolEngine {
    PoolEngine::builder()
        .detector(EnvironmentDetector::fixed(EnvironmentKind::None))
        .transaction_manager(Arc::new(LocalTransactionManager::new()))
        .pool(definition)
        .build()
}

async fn execute(handle: &mut ConnectionHandle, sql: &str) {
    let conn = handle
        .downcast_mut::<SqlxConnection>()
        .and_then(SqlxConnection::inner_mut)
        .unwrap();
    match conn {
        DbConnection::SQLite(c) => {
            sqlx::query(sql).execute(&mut **c).await.unwrap();
        }
        other => panic!("unexpected connection: {other:?}"),
    }
}

async fn count_rows(handle: &mut ConnectionHandle) -> i64 {
    let conn = handle
        .downcast_mut::<SqlxConnection>()
        .and_then(SqlxConnection::inner_mut)
        .unwrap();
    match conn {
        DbConnection::SQLite(c) => {
            let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items")
                .fetch_one(&mut **c)
                .await
                .unwrap();
            count
        }
        other => panic!("unexpected connection: {other:?}"),
    }
}

async fn create_items_table(engine: &PoolEngine) {
    let mut handle = engine.borrow("APPDB", BorrowRequest::new()).await.unwrap();
    execute(&mut handle, "CREATE TABLE items (id INTEGER PRIMARY KEY)").await;
    handle.release().await.unwrap();
}

async fn visible_rows(engine: &PoolEngine) -> i64 {
    let mut handle = engine.borrow("APPDB", BorrowRequest::new()).await.unwrap();
    let count = count_rows(&mut handle).await;
    handle.release().await.unwrap();
    count
}

#[tokio::test]
async fn test_validate_sqlite_pool() {
    let dir = TempDir::new().unwrap();
    let engine = engine(sqlite_definition(&dir, "?isolation=read_uncommitted"));

    engine.validate_pool("APPDB").await.unwrap();
    assert!(dir.path().join("app.db").exists());
    assert_eq!(engine.usage().outstanding_count(), 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_release_discards_uncommitted_work() {
    let dir = TempDir::new().unwrap();
    let engine = engine(sqlite_definition(&dir, ""));
    create_items_table(&engine).await;

    let mut handle = engine
        .borrow("APPDB", BorrowRequest::new().with_autocommit(false))
        .await
        .unwrap();
    assert!(handle.autocommit_changed());
    execute(&mut handle, "INSERT INTO items (id) VALUES (1)").await;
    handle.release().await.unwrap();

    assert_eq!(visible_rows(&engine).await, 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_explicit_commit_persists() {
    let dir = TempDir::new().unwrap();
    let engine = engine(sqlite_definition(&dir, "?autocommit=false"));
    {
        let mut handle = engine
            .borrow("APPDB", BorrowRequest::new().with_autocommit(true))
            .await
            .unwrap();
        execute(&mut handle, "CREATE TABLE items (id INTEGER PRIMARY KEY)").await;
        handle.release().await.unwrap();
    }

    // The definition turns autocommit off; only the committed row survives.
    let mut handle = engine.borrow("APPDB", BorrowRequest::new()).await.unwrap();
    execute(&mut handle, "INSERT INTO items (id) VALUES (1)").await;
    handle.commit().await.unwrap();
    execute(&mut handle, "INSERT INTO items (id) VALUES (2)").await;
    handle.release().await.unwrap();

    let mut handle = engine
        .borrow("APPDB", BorrowRequest::new().with_autocommit(true))
        .await
        .unwrap();
    assert_eq!(count_rows(&mut handle).await, 1);
    handle.release().await.unwrap();
    engine.shutdown().await;
}

#[tokio::test]
async fn test_close_with_autocommit_off_rolls_back() {
    let dir = TempDir::new().unwrap();
    let definition = sqlite_definition(&dir, "");
    let pool = SqlxConnector::new().open(&definition).await.unwrap();

    let mut conn = pool.borrow(None).await.unwrap();
    let sqlx_conn = conn.as_any_mut().downcast_mut::<SqlxConnection>().unwrap();
    if let Some(DbConnection::SQLite(c)) = sqlx_conn.inner_mut() {
        sqlx::query("CREATE TABLE items (id INTEGER PRIMARY KEY)")
            .execute(&mut **c)
            .await
            .unwrap();
    }

    conn.set_autocommit(false).await.unwrap();
    let sqlx_conn = conn.as_any_mut().downcast_mut::<SqlxConnection>().unwrap();
    if let Some(DbConnection::SQLite(c)) = sqlx_conn.inner_mut() {
        sqlx::query("INSERT INTO items (id) VALUES (1)")
            .execute(&mut **c)
            .await
            .unwrap();
    }
    conn.close().await.unwrap();
    assert!(conn.autocommit());

    let mut conn = pool.borrow(None).await.unwrap();
    let sqlx_conn = conn.as_any_mut().downcast_mut::<SqlxConnection>().unwrap();
    let Some(DbConnection::SQLite(c)) = sqlx_conn.inner_mut() else {
        panic!("expected a SQLite connection");
    };
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items")
        .fetch_one(&mut **c)
        .await
        .unwrap();
    assert_eq!(count, 0);
    conn.close().await.unwrap();
    pool.close().await;
}

#[tokio::test]
async fn test_sqlx_pool_rejects_credentials() {
    let dir = TempDir::new().unwrap();
    let engine = engine(sqlite_definition(&dir, ""));

    let err = engine
        .borrow(
            "APPDB",
            BorrowRequest::new().with_credentials(Credentials::new("app", "secret")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::CredentialsUnsupported { .. }));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_borrow_after_destroy_reopens() {
    let dir = TempDir::new().unwrap();
    let engine = engine(sqlite_definition(&dir, ""));

    engine.ensure_pool("APPDB").await.unwrap();
    engine.destroy_pool("APPDB").await.unwrap();
    assert!(engine.pool_stats().await.is_empty());

    let handle = engine.borrow("APPDB", BorrowRequest::new()).await.unwrap();
    handle.release().await.unwrap();
    assert_eq!(engine.pool_stats().await.len(), 1);
    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_probe_reports_healthy_run() {
    let dir = TempDir::new().unwrap();
    let engine = engine(sqlite_definition(&dir, "?autocommit=false&max_connections=2"));

    let report = run_probe(&engine, &["APPDB".to_string()], 3, 4).await;
    assert!(report.is_healthy(), "{report:?}");
    assert_eq!(report.environment, EnvironmentKind::None);
    assert!(report.transactions_supported);

    let pool = &report.pools[0];
    assert!(pool.validated);
    assert_eq!(pool.borrows, 12);
    assert_eq!(pool.failed_borrows, 0);
    assert_eq!(pool.transaction_guard_ok, Some(true));
    assert_eq!(report.usage.outstanding, 0);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["environment"], "none");
    assert_eq!(json["ownership"], "self_managed");
    engine.shutdown().await;
}
