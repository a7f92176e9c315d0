//! API Router and Application State
//!
//! Central routing configuration and shared state.

mod error;
pub mod fulfillment;
pub mod ingest;
pub mod sessions;

use axum::{
    extract::State, http::StatusCode, middleware::from_fn_with_state, routing::get,
    routing::post, Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

pub use error::ApiError;

use crate::{
    auth, collaborators::Services, config::Config, dispatch::Dispatcher, events::EventBus,
    stream,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Turn event bus
    pub bus: Arc<dyn EventBus>,
    /// Turn dispatcher
    pub dispatcher: Dispatcher,
    /// Domain collaborators used directly by request handlers
    pub services: Services,
    /// Cancelled on shutdown; ends open event streams
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        config: Config,
        bus: Arc<dyn EventBus>,
        dispatcher: Dispatcher,
        services: Services,
    ) -> Self {
        Self {
            config: Arc::new(config),
            bus,
            dispatcher,
            services,
            shutdown: CancellationToken::new(),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let webhook_routes = Router::new()
        .route("/cx/fulfillment", post(fulfillment::fulfill))
        .layer(from_fn_with_state(state.clone(), auth::require_webhook_key));

    Router::new()
        .route("/health", get(health_check))
        .route("/sessions", post(sessions::bootstrap))
        .route("/ingest/web", post(ingest::web))
        .route("/stream", get(stream::stream_session))
        .merge(webhook_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    bus: &'static str,
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.bus.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                bus: "up",
            }),
        ),
        Err(e) => {
            warn!("Health check: event bus unreachable: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    bus: "down",
                }),
            )
        }
    }
}
