//! HTTP proxy exposing the dispatcher to browser front ends.

mod handlers;

use crate::config::{Config, CredentialPool, ServerConfig};
use crate::core::error::EspejoError;
use crate::dispatch::Dispatcher;
use crate::providers::gemini::GenerationConfig;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use handlers::ApiError;

pub const VISOR_KEY_VAR: &str = "GEMINI_API_KEY_VISOR";

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// Single-key dispatcher behind `/api/visor`; absent when its key is unset.
    pub visor: Option<Arc<Dispatcher>>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, visor: Option<Arc<Dispatcher>>) -> Self {
        Self { dispatcher, visor }
    }

    /// Builds both dispatchers from configuration and the environment.
    pub fn from_config(config: &Config) -> Result<Self, EspejoError> {
        let pool = CredentialPool::from_env();
        if pool.is_empty() {
            warn!("No GEMINI_KEY_<n> or GEMINI_API_KEYS configured; completions will fail");
        }
        let dispatcher = Dispatcher::gemini(config.dispatch.clone(), pool)?;
        let visor_key = std::env::var(VISOR_KEY_VAR).ok();
        let visor = visor_dispatcher(config, visor_key)?;
        Ok(Self::new(Arc::new(dispatcher), visor.map(Arc::new)))
    }
}

/// The visor route uses one dedicated key, one model and capped output.
pub fn visor_dispatcher(
    config: &Config,
    key: Option<String>,
) -> Result<Option<Dispatcher>, EspejoError> {
    let Some(key) = key.filter(|k| !k.trim().is_empty()) else {
        return Ok(None);
    };
    let mut dispatch = config.dispatch.clone();
    dispatch.models = vec![config.visor.model.clone()];
    dispatch.shuffle_keys = false;
    let dispatcher = Dispatcher::gemini(dispatch, CredentialPool::new([key]))?
        .with_generation_config(GenerationConfig {
            max_output_tokens: config.visor.max_output_tokens,
        });
    Ok(Some(dispatcher))
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/complete",
            post(handlers::complete).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/gemini",
            post(handlers::complete).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/visor",
            post(handlers::visor).fallback(handlers::method_not_allowed),
        )
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: &ServerConfig, state: AppState) -> Result<(), EspejoError> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Espejo proxy listening on http://{}", addr);

    axum::serve(listener, router(state, config.max_body_bytes))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Espejo proxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
