// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! End-to-end tests of the HTTP surface, driven in-process through the router.

use std::io::{Cursor, Read};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use atlas_server::config::{DatabaseMode, ServerConfig};
use atlas_server::dataset::{ColumnRoles, DatasetMetadata, DatasetStore};
use atlas_server::server::{AppState, build_router};
use atlas_server::session::SessionCache;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

const PRICES: [f64; 6] = [20.0, 150.0, 75.5, 101.0, 99.0, 400.0];

struct TestServer {
    router: Router,
    _tmp: TempDir,
}

fn table() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("_row_index", DataType::Int64, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("price", DataType::Float64, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from_iter_values(0..PRICES.len() as i64)),
        Arc::new(StringArray::from(vec!["a", "b", "c", "d", "e", "f"])),
        Arc::new(Float64Array::from(PRICES.to_vec())),
    ];
    RecordBatch::try_new(schema, columns).unwrap()
}

fn server(database: DatabaseMode) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let static_dir = tmp.path().join("static");
    std::fs::create_dir_all(&static_dir).unwrap();
    std::fs::write(static_dir.join("index.html"), "<html>atlas</html>").unwrap();
    std::fs::write(static_dir.join("app.js"), "run()").unwrap();

    let config = ServerConfig {
        static_dir,
        database,
        cache_root: tmp.path().join("cache"),
        scratch_dir: tmp.path().join("scratch"),
        ..Default::default()
    };

    let metadata = DatasetMetadata {
        columns: ColumnRoles {
            id: "_row_index".to_string(),
            text: Some("title".to_string()),
            embedding: None,
            neighbors: None,
        },
    };
    let inputs = ["shop.parquet".to_string()];
    let identifier = DatasetStore::identifier_for(&inputs, &metadata).unwrap();
    let session_dir = SessionCache::new(&config.cache_root).dataset_dir(identifier.as_str());
    let store = DatasetStore::new(identifier, table(), metadata, session_dir).unwrap();

    let state = Arc::new(AppState::new(Arc::new(store), &config));
    TestServer {
        router: build_router(state),
        _tmp: tmp,
    }
}

impl TestServer {
    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn post_json(&self, uri: &str, body: &str) -> Response {
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}

#[tokio::test]
async fn test_dataset_range_request() {
    let server = server(DatabaseMode::Wasm);

    let full = server.get("/data/dataset.parquet").await;
    assert_eq!(full.status(), StatusCode::OK);
    let full = body_bytes(full).await;
    assert_eq!(&full[..4], b"PAR1");

    let partial = server
        .send(
            Request::get("/data/dataset.parquet")
                .header(header::RANGE, "bytes=0-9")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(partial.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        partial.headers()[header::CONTENT_RANGE],
        format!("bytes 0-9/{}", full.len()).as_str()
    );
    assert_eq!(body_bytes(partial).await, full[..10].to_vec());
}

#[tokio::test]
async fn test_dataset_out_of_bounds_range_sends_everything() {
    let server = server(DatabaseMode::Wasm);
    let len = body_bytes(server.get("/data/dataset.parquet").await).await.len();

    let response = server
        .send(
            Request::get("/data/dataset.parquet")
                .header(header::RANGE, format!("bytes=0-{}", len))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.len(), len);
}

#[tokio::test]
async fn test_dataset_head() {
    let server = server(DatabaseMode::Wasm);
    let response = server
        .send(
            Request::builder()
                .method(Method::HEAD)
                .uri("/data/dataset.parquet")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/octet-stream");
}

#[tokio::test]
async fn test_metadata_includes_database() {
    let server = server(DatabaseMode::Server);
    let metadata = body_json(server.get("/data/metadata.json").await).await;
    assert_eq!(metadata["columns"]["id"], "_row_index");
    assert_eq!(metadata["columns"]["text"], "title");
    assert_eq!(metadata["database"], json!({"type": "rest"}));

    let remote = server_with_remote();
    let metadata = body_json(remote.get("/data/metadata.json").await).await;
    assert_eq!(
        metadata["database"],
        json!({"type": "socket", "uri": "ws://db:3000", "load": true})
    );
}

fn server_with_remote() -> TestServer {
    server("ws://db:3000".parse().unwrap())
}

#[tokio::test]
async fn test_cache_roundtrip() {
    let server = server(DatabaseMode::Wasm);

    let missing = server.get("/data/cache/layout").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert!(body_bytes(missing).await.is_empty());

    let stored = server
        .post_json("/data/cache/layout", r#"{"panels": ["map", "table"], "zoom": 3}"#)
        .await;
    assert_eq!(stored.status(), StatusCode::OK);

    let fetched = server.get("/data/cache/layout").await;
    assert_eq!(fetched.status(), StatusCode::OK);
    assert_eq!(body_json(fetched).await, json!({"panels": ["map", "table"], "zoom": 3}));
}

#[tokio::test]
async fn test_cache_rejects_bad_input() {
    let server = server(DatabaseMode::Wasm);

    let response = server.post_json("/data/cache/layout", "{not json").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());

    let response = server.post_json("/data/cache/..", "1").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_query_json() {
    let server = server(DatabaseMode::Server);
    let response = server
        .post_json(
            "/data/query",
            r#"{"sql": "SELECT count(*) AS n FROM dataset WHERE price > 100", "type": "json"}"#,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");

    let expected = PRICES.iter().filter(|p| **p > 100.0).count();
    assert_eq!(body_json(response).await, json!([{"n": expected}]));
}

#[tokio::test]
async fn test_query_via_get() {
    let server = server(DatabaseMode::Server);
    let query = encode(r#"{"sql": "SELECT 1 AS one", "type": "json"}"#);
    let response = server.get(&format!("/data/query?query={}", query)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!([{"one": 1}]));
}

#[tokio::test]
async fn test_query_arrow_and_exec() {
    let server = server(DatabaseMode::Server);

    let response = server
        .post_json("/data/query", r#"{"sql": "SELECT title FROM dataset", "type": "arrow"}"#)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/octet-stream");
    let bytes = body_bytes(response).await;
    let reader = arrow::ipc::reader::StreamReader::try_new(Cursor::new(bytes), None).unwrap();
    let rows: usize = reader.map(|batch| batch.unwrap().num_rows()).sum();
    assert_eq!(rows, PRICES.len());

    let response = server.post_json("/data/query", r#"{"sql": "SELECT 42", "type": "exec"}"#).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({}));
}

#[tokio::test]
async fn test_query_error_is_500() {
    let server = server(DatabaseMode::Server);
    let response = server
        .post_json("/data/query", r#"{"sql": "SELECT * FROM nonexistent_table", "type": "json"}"#)
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error = body_json(response).await;
    assert!(error["error"].as_str().unwrap().contains("nonexistent_table"));

    // The server keeps answering.
    let response = server.post_json("/data/query", r#"{"sql": "SELECT 1", "type": "json"}"#).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_query_malformed_body_is_400() {
    let server = server(DatabaseMode::Server);
    let response = server.post_json("/data/query", r#"{"sql": "SELECT 1"}"#).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = server.post_json("/data/query", r#"{"sql": "SELECT 1", "type": "yaml"}"#).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_selection_export() {
    let server = server(DatabaseMode::Server);
    let response = server
        .post_json("/data/selection", r#"{"predicate": "price > 100", "format": "json"}"#)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let rows: Vec<Value> = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(rows.len(), PRICES.iter().filter(|p| **p > 100.0).count());

    let response = server.post_json("/data/selection", r#"{"format": "csv"}"#).await;
    let csv = String::from_utf8(body_bytes(response).await).unwrap();
    assert_eq!(csv.lines().count(), PRICES.len() + 1);

    let response = server
        .post_json("/data/selection", r#"{"predicate": "missing_column = 1", "format": "csv"}"#)
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_archive_contains_dataset_and_cache() {
    let server = server(DatabaseMode::Server);
    server.post_json("/data/cache/layout", r#"{"zoom": 2}"#).await;
    let response = server.post_json("/data/cache/.tmpstate", r#"[1]"#).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = server.get("/data/archive.zip").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");

    let mut archive = zip::ZipArchive::new(Cursor::new(body_bytes(response).await)).unwrap();
    let mut names: Vec<String> = archive.file_names().map(String::from).collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "app.js",
            "data/cache/.tmpstate",
            "data/cache/layout",
            "data/dataset.parquet",
            "data/metadata.json",
            "index.html",
        ]
    );

    let mut metadata = String::new();
    archive
        .by_name("data/metadata.json")
        .unwrap()
        .read_to_string(&mut metadata)
        .unwrap();
    let metadata: Value = serde_json::from_str(&metadata).unwrap();
    assert_eq!(metadata["is_static"], true);
    assert_eq!(metadata["database"], json!({"type": "wasm", "load": true}));
}

#[tokio::test]
async fn test_static_frontend() {
    let server = server(DatabaseMode::Wasm);

    let response = server.get("/app.js").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"run()");

    let response = server.get("/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"<html>atlas</html>");

    let response = server.get("/some/client/route").await;
    assert_eq!(body_bytes(response).await, b"<html>atlas</html>");
}

#[tokio::test]
async fn test_cors_headers() {
    let server = server(DatabaseMode::Wasm);
    let response = server
        .send(
            Request::get("/data/metadata.json")
                .header(header::ORIGIN, "http://example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}
