use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::llm::generation::GenerationConfig;
use crate::worker::ModelWorker;

/// Everything a request handler needs, built once at startup.
pub struct AppState {
    pub worker: Arc<ModelWorker>,
    pub generation: GenerationConfig,
    pub limiter: Arc<Semaphore>,
    pub request_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(
        worker: Arc<ModelWorker>,
        generation: GenerationConfig,
        max_concurrent_requests: usize,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            worker,
            generation,
            limiter: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
            request_timeout,
        }
    }
}
