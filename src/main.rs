use std::sync::Arc;

use anyhow::Error;
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use llm_serve::api::server::create_router;
use llm_serve::app_state::AppState;
use llm_serve::config::ServeArgs;
use llm_serve::worker::{LoadOptions, ModelWorker};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_serve=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = ServeArgs::parse();
    let addr = args.bind_address()?;

    info!(
        "Loading {} (revision {})",
        args.model_id,
        args.revision.as_deref().unwrap_or("default")
    );
    let options = LoadOptions {
        dtype: args.dtype.into(),
        force_cpu: args.cpu,
    };
    let model_id = args.model_id.clone();
    let revision = args.revision.clone();
    let worker = tokio::task::spawn_blocking(move || {
        ModelWorker::load(&model_id, revision.as_deref(), &options)
    })
    .await??;

    let generation = args.generation_config(worker.default_generation_config());
    generation.validate().map_err(anyhow::Error::msg)?;

    let state = Arc::new(AppState::new(
        Arc::new(worker),
        generation,
        args.max_concurrent_requests,
        args.request_timeout(),
    ));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving {} on http://{}", args.model_id, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    Ok(())
}
