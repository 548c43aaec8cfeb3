//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use parcel_core::config::AppConfig;
use parcel_store::{DocumentStore, MemoryDocumentStore};
use parcel_server::{AppState, create_router};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

/// A test server wrapper around the router and its state.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with the in-memory store and test defaults.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a test server with custom config modifications.
    pub fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        Self::with_store(store, modifier)
    }

    /// Create a test server around an existing store.
    pub fn with_store<F>(store: Arc<dyn DocumentStore>, modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = AppConfig::for_testing();
        modifier(&mut config);

        let state = AppState::new(config, store);
        let router = create_router(state.clone());

        Self { router, state }
    }

    /// Send a JSON (or empty) request and decode the JSON response.
    pub async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };

        self.send(builder.body(body).unwrap()).await
    }

    /// PUT a raw chunk payload.
    pub async fn put_chunk(&self, upload_id: &str, index: u32, data: &[u8]) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("PUT")
            .uri(format!("/api/fleet/uploads/{upload_id}/{index}"))
            .header("Content-Type", "application/octet-stream")
            .body(Body::from(data.to_vec()))
            .unwrap();

        self.send(request).await
    }

    /// Initiate an upload, asserting success, and return `(upload_id, chunk_size)`.
    pub async fn begin(&self, body: Value) -> (String, u64) {
        let (status, json) = self.json("POST", "/api/fleet/uploads", Some(body)).await;
        assert_eq!(status, StatusCode::OK, "initiate failed: {json}");
        let upload_id = json["upload_id"].as_str().unwrap().to_string();
        let chunk_size = json["chunk_size"].as_u64().unwrap();
        (upload_id, chunk_size)
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        let json: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        (status, json)
    }
}
