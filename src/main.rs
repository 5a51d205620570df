//! Inference gateway binary: wires config, session storage, the llama-server
//! engine and the HTTP/WebSocket API together.

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use inference_gateway::api;
use inference_gateway::config::Config;
use inference_gateway::engine::LlamaServerFactory;
use inference_gateway::session::MemoryBackend;
use inference_gateway::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load().map_err(|e| {
        format!(
            "Failed to load configuration: {}. \
             Make sure config.toml exists or set GATEWAY__ENGINE__MODEL_PATH.",
            e
        )
    })?;
    tracing::info!(
        "Starting inference-gateway: model={}, queue={}, concurrency={}",
        config.engine.model_path,
        config.limits.queue_max_size,
        config.limits.max_concurrent_requests
    );

    // The engine is built lazily behind the guard: a missing model file is
    // reported per request and retried, it never takes the gateway down.
    let factory = Arc::new(LlamaServerFactory::new(config.engine.clone()));
    let state = Arc::new(AppState::new(
        &config.limits,
        Arc::new(MemoryBackend::new()),
        factory,
    ));

    // Build router
    let app = Router::new()
        .nest("/v1", api::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Start server
    let addr = format!("{}:{}", config.api.host, config.api.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
