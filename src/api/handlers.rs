use axum::{body::Bytes, extract::State, Json};
use std::sync::Arc;

use crate::api::adapter;
use crate::api::models::{HealthResponse, ResponseRow};
use crate::app_state::AppState;
use crate::error::ServeError;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        model: state.worker.model_id().to_string(),
    })
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Vec<ResponseRow>>, ServeError> {
    let prompts = adapter::parse(&body)?;
    tracing::debug!("Generate request with {} prompt(s)", prompts.len());

    let limiter = Arc::clone(&state.limiter);
    let worker = Arc::clone(&state.worker);
    let config = state.generation.clone();
    // the deadline covers waiting for a permit as well as generating; a
    // timed-out generation keeps its permit until it finishes
    let run = async move {
        let permit = limiter
            .acquire_owned()
            .await
            .map_err(ServeError::generation)?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            worker.generate(&prompts, &config)
        })
        .await
        .map_err(|e| ServeError::generation(format!("generation task failed: {e}")))?
    };

    let completions = match state.request_timeout {
        Some(timeout) => tokio::time::timeout(timeout, run)
            .await
            .map_err(|_| ServeError::Timeout(timeout))??,
        None => run.await?,
    };

    Ok(Json(adapter::render(completions)))
}
