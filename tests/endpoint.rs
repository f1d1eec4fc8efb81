//! Drives the HTTP router end to end against a tiny GPT-J snapshot.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::json;
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;
use tower::ServiceExt;

use common::{post_json, router, tiny_worker};
use llm_serve::llm::causal_self_attention::KVCache;
use llm_serve::llm::models::Model;
use llm_serve::worker::{LoadOptions, ModelWorker};

#[tokio::test]
async fn one_response_per_flattened_prompt() {
    let (_dir, worker) = tiny_worker();
    let config = worker.default_generation_config().with_max_length(12);
    let app = router(worker, config, None);

    let (status, body) = post_json(
        app,
        r#"[{"text": "hello world"}, {"text": ["in a remote valley", "scientists discovered"]}]"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 3);
    let prompts = ["hello world", "in a remote valley", "scientists discovered"];
    for (row, prompt) in rows.iter().zip(prompts) {
        let text = row["responses"].as_str().unwrap();
        assert!(text.starts_with(prompt), "{text:?} does not extend {prompt:?}");
        assert_eq!(row.as_object().unwrap().len(), 1);
    }
}

#[tokio::test]
async fn greedy_requests_are_repeatable() {
    let (_dir, worker) = tiny_worker();
    let config = worker
        .default_generation_config()
        .greedy()
        .with_max_length(16);
    let app = router(worker, config, None);
    let body = r#"[{"text": "a shocking finding"}]"#;

    let (_, first) = post_json(app.clone(), body).await;
    let (_, second) = post_json(app, body).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn malformed_bodies_are_client_errors() {
    let (_dir, worker) = tiny_worker();
    let config = worker.default_generation_config();
    let app = router(worker, config, None);

    for body in ["{}", r#"[{"notext": "x"}]"#, r#"[{"text": 5}]"#] {
        let (status, payload) = post_json(app.clone(), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert!(payload["error"]
            .as_str()
            .unwrap()
            .starts_with("malformed request"));
    }
}

#[tokio::test]
async fn bad_request_leaves_worker_serving() {
    let (_dir, worker) = tiny_worker();
    let config = worker.default_generation_config().with_max_length(10);
    let app = router(worker, config, None);

    let (status, _) = post_json(app.clone(), r#"[{"text": 5}]"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post_json(app, r#"[{"text": "hello"}]"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn generation_failure_is_a_server_error() {
    let (_dir, worker) = tiny_worker();
    let config = worker.default_generation_config().with_max_length(3);
    let app = router(worker, config, None);

    // two good prompts and one that already fills max_length: nothing is returned
    let (status, payload) = post_json(
        app,
        r#"[{"text": ["hello", "hello world hello", "world"]}]"#,
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(payload["error"]
        .as_str()
        .unwrap()
        .starts_with("generation failed"));
}

#[tokio::test]
async fn empty_batch_returns_empty_array() {
    let (_dir, worker) = tiny_worker();
    let config = worker.default_generation_config();
    let app = router(worker, config, None);

    let (status, body) = post_json(app, "[]").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

/// Sleeps on every forward pass, then predicts EOS.
struct Sleepy;

impl Model for Sleepy {
    fn forward_with_cache(
        &self,
        input_ids: &Tensor,
        _positions: &[Vec<u32>],
        _attention_mask: &[Vec<u32>],
        _kv_caches: &mut [KVCache],
    ) -> candle_core::Result<Tensor> {
        std::thread::sleep(Duration::from_millis(500));
        let (batch, _) = input_ids.dims2()?;
        let vocab = common::fixtures::VOCAB.len();
        let mut logits = vec![0f32; batch * vocab];
        for row in 0..batch {
            logits[row * vocab + common::fixtures::EOS_TOKEN_ID as usize] = 1.0;
        }
        Tensor::from_vec(logits, (batch, vocab), &Device::Cpu)
    }

    fn num_layers(&self) -> usize {
        1
    }

    fn max_positions(&self) -> usize {
        common::fixtures::N_POSITIONS
    }
}

fn sleepy_router(timeout: Duration) -> axum::Router {
    let tokenizer = Tokenizer::from_bytes(common::fixtures::tokenizer_json().as_bytes()).unwrap();
    let worker = ModelWorker::from_parts(
        "sleepy",
        Box::new(Sleepy),
        tokenizer,
        Device::Cpu,
        common::fixtures::EOS_TOKEN_ID,
    )
    .unwrap();
    let config = worker.default_generation_config().greedy();
    router(Arc::new(worker), config, Some(timeout))
}

#[tokio::test]
async fn slow_generation_times_out() {
    let app = sleepy_router(Duration::from_millis(50));

    let (status, payload) = post_json(app, r#"[{"text": "hello"}]"#).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert!(payload["error"].as_str().unwrap().contains("timed out"));
}

#[tokio::test]
async fn queued_request_times_out_while_waiting_for_a_slot() {
    let app = sleepy_router(Duration::from_millis(100));
    let body = r#"[{"text": "hello"}]"#;

    let started = Instant::now();
    let (running, queued) = tokio::join!(post_json(app.clone(), body), post_json(app, body));
    let elapsed = started.elapsed();

    assert_eq!(running.0, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(queued.0, StatusCode::GATEWAY_TIMEOUT);
    // one forward pass alone sleeps 500ms
    assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
}

#[tokio::test]
async fn health_reports_the_model() {
    let (dir, worker) = tiny_worker();
    let config = worker.default_generation_config();
    let app = router(worker, config, None);

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model"], dir.path().to_str().unwrap());
}

#[test]
fn unknown_model_fails_to_load() {
    let err = ModelWorker::load("no/such/model/here", None, &LoadOptions::default())
        .err()
        .unwrap();
    assert!(err.to_string().starts_with("failed to load model"));
}

#[tokio::test]
#[ignore = "downloads GPT-J-6B (~12 GB) and needs a GPU"]
async fn gptj_6b_extends_the_unicorn_prompt() {
    let worker = tokio::task::spawn_blocking(|| {
        ModelWorker::load("EleutherAI/gpt-j-6B", Some("float16"), &LoadOptions::default())
            .map_err(|e| e.to_string())
    })
    .await
    .unwrap()
    .unwrap();
    let config = worker.default_generation_config();
    let app = router(Arc::new(worker), config, None);

    let prompt = "In a shocking finding, scientists discovered a herd of unicorns living in a remote, \
                  previously unexplored valley, in the Andes Mountains.";
    let (status, body) = post_json(app, &json!([{ "text": prompt }]).to_string()).await;

    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    let text = rows[0]["responses"].as_str().unwrap();
    assert!(!text.is_empty());
    assert!(text.len() >= prompt.len());
}
