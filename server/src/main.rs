//! Parley Server - Main Entry Point

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use parley_server::{
    actions, api,
    collaborators::{HttpBackend, MemoryBackend, Services},
    config::{self, EventBusKind},
    db,
    dispatch::{Dispatcher, IdempotencyStore, MemoryIdempotencyStore, SharedScopeFactory},
    events::{EventBus, MemoryEventBus, RedisEventBus},
    observability,
    util::spawn_sweep_task,
};

/// How often the in-memory stores drop expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    // Dropped last, after the dispatcher drains
    let _otel_guard = observability::init(&config.observability);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Parley Server"
    );

    // Event bus and redelivery markers
    // In-memory stores are swept once the shutdown token exists
    let mut memory_stores = None;
    let (bus, dedupe): (Arc<dyn EventBus>, Arc<dyn IdempotencyStore>) = match config.event_bus {
        EventBusKind::Redis => {
            let redis = db::create_redis_client(&config.redis_url).await?;
            (
                Arc::new(RedisEventBus::new(
                    redis.clone(),
                    config.sse_channel_prefix.clone(),
                    config.snapshot_ttl,
                )),
                Arc::new(db::RedisIdempotencyStore::new(redis, config.idempotency_ttl)),
            )
        }
        EventBusKind::Memory => {
            warn!("Using in-process event bus; streams only see turns run by this instance");
            let bus = Arc::new(MemoryEventBus::new(config.snapshot_ttl));
            let dedupe = Arc::new(MemoryIdempotencyStore::new(config.idempotency_ttl));
            memory_stores = Some((bus.clone(), dedupe.clone()));
            (bus as Arc<dyn EventBus>, dedupe as Arc<dyn IdempotencyStore>)
        }
    };

    // Domain collaborators
    let services = match config.backend_url.as_deref() {
        Some(url) => {
            info!(url, "Using HTTP backend");
            Services::from_backend(Arc::new(HttpBackend::new(url, config.backend_timeout)?))
        }
        None => {
            warn!("BACKEND_URL not set; using in-memory backend");
            Services::from_backend(Arc::new(MemoryBackend::new()))
        }
    };

    let dispatcher = Dispatcher::new(
        actions::default_registry(),
        bus.clone(),
        Arc::new(SharedScopeFactory::new(services.clone())),
        dedupe,
    );

    // Build application state
    let state = api::AppState::new(config.clone(), bus, dispatcher.clone(), services);
    let shutdown = state.shutdown.clone();

    if let Some((bus, dedupe)) = memory_stores {
        spawn_sweep_task("event_bus", SWEEP_INTERVAL, shutdown.clone(), move || {
            bus.purge_expired();
        });
        spawn_sweep_task("idempotency", SWEEP_INTERVAL, shutdown.clone(), move || {
            dedupe.purge_expired();
        });
    }

    // Build router
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    // Graceful shutdown handler; open streams end when the token is cancelled
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
        shutdown.cancel();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    dispatcher.shutdown().await;
    info!("Server shutdown complete");

    Ok(())
}
