//! Pool sharing and shutdown behaviour.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use db_blob_extension::Extension;
use db_blob_extension::config::ProbePolicy;
use db_blob_extension::db::{DbPool, PoolRegistry, QueryExecutor};
use db_blob_extension::models::BlobStorageConfig;
use db_blob_extension::storage::SignedUrlIssuer;
use serde_json::{Value, json};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;
use tower::ServiceExt;

fn issuer() -> SignedUrlIssuer {
    SignedUrlIssuer::new(BlobStorageConfig::new("acct", "docs", "c2VjcmV0LWtleQ==")).unwrap()
}

/// File-backed pool so every connection sees the same tables.
async fn file_pool(dir: &TempDir, max_connections: u32) -> DbPool {
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("lifecycle.db"))
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .unwrap();
    DbPool::SQLite(pool)
}

fn query(sql: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/sql_query")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "query": sql }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_concurrent_requests_share_small_pool() {
    let dir = TempDir::new().unwrap();
    let pool = file_pool(&dir, 2).await;
    let executor = QueryExecutor::new();
    executor
        .execute(&pool, "CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT)", &[])
        .await
        .unwrap();
    executor
        .execute(&pool, "INSERT INTO items (label) VALUES ('a'), ('b'), ('c')", &[])
        .await
        .unwrap();

    let mut registry = PoolRegistry::new();
    registry.insert("main", pool.clone()).unwrap();
    let extension = Extension::new(registry, issuer());
    let router = extension.init(Router::new());

    let mut handles = Vec::new();
    for i in 0..10 {
        let router = router.clone();
        let sql = if i % 3 == 0 {
            "SELECT * FROM missing_table".to_string()
        } else {
            format!("SELECT count(*) AS c, {} AS i FROM items", i)
        };
        handles.push(tokio::spawn(async move {
            let response = router.oneshot(query(&sql)).await.unwrap();
            (i, response.status())
        }));
    }

    for handle in handles {
        let (i, status) = handle.await.unwrap();
        if i % 3 == 0 {
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        } else {
            assert_eq!(status, StatusCode::OK);
        }
    }

    // Every connection was returned, failures included: both can be held at once.
    assert!(pool.size() <= 2);
    if let DbPool::SQLite(sqlite) = &pool {
        let first = sqlite.acquire().await.unwrap();
        let second = sqlite.acquire().await.unwrap();
        drop((first, second));
    }

    extension.exit().await;
}

#[tokio::test]
async fn test_exit_twice_then_queries_fail_with_connection_error() {
    let dir = TempDir::new().unwrap();
    let pool = file_pool(&dir, 2).await;
    let mut registry = PoolRegistry::new();
    registry.insert("main", pool.clone()).unwrap();
    let extension = Extension::new(registry, issuer());
    let router = extension.init(Router::new());

    let response = router.clone().oneshot(query("SELECT 1 AS n")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    extension.exit().await;
    extension.exit().await;
    assert!(pool.is_closed());

    let response = router.clone().oneshot(query("SELECT 1 AS n")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"Internal Server Error");

    let err = QueryExecutor::new()
        .execute(&pool, "SELECT 1 AS n", &[])
        .await
        .unwrap_err();
    assert!(err.is_connection());

    // The probe route still answers without a database.
    let probe = Request::builder()
        .method("POST")
        .uri("/probe")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(probe).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_probe_backends_in_order() {
    let dir = TempDir::new().unwrap();
    let mut registry = PoolRegistry::new();
    registry.insert("primary", file_pool(&dir, 1).await).unwrap();
    registry.insert("archive", file_pool(&dir, 1).await).unwrap();
    let extension = Extension::new(registry, issuer());

    extension.probe_backends(ProbePolicy::Strict).await.unwrap();
    extension.probe_backends(ProbePolicy::BestEffort).await.unwrap();
    extension.exit().await;
}

#[tokio::test]
async fn test_written_rows_visible_across_requests() {
    let dir = TempDir::new().unwrap();
    let mut registry = PoolRegistry::new();
    registry.insert("main", file_pool(&dir, 2).await).unwrap();
    let extension = Extension::new(registry, issuer());
    let router = extension.init(Router::new());

    for sql in [
        "CREATE TABLE notes (body TEXT)",
        "INSERT INTO notes VALUES ('first')",
        "INSERT INTO notes VALUES ('second')",
    ] {
        let response = router.clone().oneshot(query(sql)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router
        .clone()
        .oneshot(query("SELECT body FROM notes ORDER BY rowid"))
        .await
        .unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let rows: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(rows, json!([{"body": "first"}, {"body": "second"}]));

    extension.exit().await;
}
