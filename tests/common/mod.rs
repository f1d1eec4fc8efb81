#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use candle_core::DType;
use tempfile::TempDir;
use tower::ServiceExt;

use llm_serve::api::server::create_router;
use llm_serve::app_state::AppState;
use llm_serve::llm::generation::GenerationConfig;
use llm_serve::worker::{LoadOptions, ModelWorker};

#[path = "../../src/fixtures.rs"]
pub mod fixtures;

/// Loads the tiny GPT-J snapshot from a temp directory, the way `main` would.
pub fn tiny_worker() -> (TempDir, Arc<ModelWorker>) {
    let dir = tempfile::tempdir().unwrap();
    fixtures::write_snapshot(dir.path());
    let options = LoadOptions {
        dtype: DType::F32,
        force_cpu: true,
    };
    let worker = ModelWorker::load(dir.path().to_str().unwrap(), None, &options)
        .map_err(|e| e.to_string())
        .unwrap();
    (dir, Arc::new(worker))
}

pub fn router(
    worker: Arc<ModelWorker>,
    generation: GenerationConfig,
    request_timeout: Option<Duration>,
) -> Router {
    let state = AppState::new(worker, generation, 1, request_timeout);
    create_router(Arc::new(state))
}

pub async fn post_json(app: Router, body: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}
