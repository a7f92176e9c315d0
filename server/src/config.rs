//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

/// Where turn events are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventBusKind {
    /// Redis pub/sub plus snapshot keys. Required for more than one instance.
    Redis,
    /// In-process broadcast channels. Single instance only.
    Memory,
}

/// Tracing and OTLP export settings.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Export spans and logs over OTLP
    pub enabled: bool,

    /// OTLP gRPC collector endpoint
    pub otlp_endpoint: String,

    /// `service.name` resource attribute
    pub service_name: String,

    /// Head sampling ratio in `[0.0, 1.0]`
    pub trace_sample_ratio: f64,

    /// Default filter directive when `RUST_LOG` is unset
    pub log_level: String,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// Redis connection URL
    pub redis_url: String,

    /// Event bus backend
    pub event_bus: EventBusKind,

    /// HS256 secret for stream credentials
    pub jwt_secret: String,

    /// Expected `iss` claim
    pub jwt_issuer: String,

    /// Expected `aud` claim
    pub jwt_audience: String,

    /// Stream credential lifetime in seconds (default: 900 = 15 min)
    pub jwt_expiry: i64,

    /// Shared key expected in `X-Api-Key` on the fulfillment webhook (optional)
    pub webhook_api_key: Option<String>,

    /// Pub/sub channel prefix, followed by the session id
    pub sse_channel_prefix: String,

    /// Snapshot lifetime (default: 20 min)
    pub snapshot_ttl: Duration,

    /// Idle interval between stream heartbeats (default: 20 s)
    pub sse_heartbeat: Duration,

    /// Reconnection delay suggested to stream clients in milliseconds
    pub sse_retry_ms: u64,

    /// Window in which a redelivered inbound message is dropped (default: 24 h)
    pub idempotency_ttl: Duration,

    /// Base URL of the domain services (optional; in-memory backend otherwise)
    pub backend_url: Option<String>,

    /// Hard timeout for backend HTTP calls
    pub backend_timeout: Duration,

    pub observability: ObservabilityConfig,
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl EventBusKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => bail!("EVENT_BUS must be `redis` or `memory`, got `{other}`"),
        }
    }
}

impl ObservabilityConfig {
    /// Load observability settings from environment variables.
    pub fn from_env() -> Self {
        Self {
            enabled: env::var("OTEL_ENABLED")
                .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes"))
                .unwrap_or(false),
            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".into()),
            service_name: env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "parley-server".into()),
            trace_sample_ratio: parse_or("OTEL_TRACES_SAMPLER_ARG", 1.0_f64).clamp(0.0, 1.0),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let event_bus =
            EventBusKind::parse(&env::var("EVENT_BUS").unwrap_or_else(|_| "redis".into()))?;

        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if jwt_secret.len() < 16 {
            bail!("JWT_SECRET must be at least 16 bytes");
        }

        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
            event_bus,
            jwt_secret,
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "parley".into()),
            jwt_audience: env::var("JWT_AUDIENCE").unwrap_or_else(|_| "parley-web".into()),
            jwt_expiry: parse_or("JWT_EXPIRY_MINUTES", 15_i64) * 60,
            webhook_api_key: non_empty("WEBHOOK_API_KEY"),
            sse_channel_prefix: env::var("SSE_CHANNEL_PREFIX").unwrap_or_else(|_| "sse:".into()),
            snapshot_ttl: Duration::from_secs(parse_or("SNAPSHOT_TTL_SECS", 1200)), // 20 min
            sse_heartbeat: Duration::from_secs(parse_or("SSE_HEARTBEAT_SECS", 20).max(1)),
            sse_retry_ms: parse_or("SSE_RETRY_MS", 15_000),
            idempotency_ttl: Duration::from_secs(parse_or("IDEMPOTENCY_TTL_SECS", 86_400)), // 24 h
            backend_url: non_empty("BACKEND_URL"),
            backend_timeout: Duration::from_secs(parse_or("BACKEND_TIMEOUT_SECS", 60)),
            observability: ObservabilityConfig::from_env(),
        })
    }

    /// Check if the webhook requires an API key.
    #[must_use]
    pub const fn has_webhook_key(&self) -> bool {
        self.webhook_api_key.is_some()
    }

    /// Create a default configuration for testing.
    ///
    /// In-memory bus; Redis tests point at `redis://localhost:6380`:
    /// `docker run -d --name parley-test-redis -p 6380:6379 redis:7`
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".into(),
            redis_url: "redis://localhost:6380".into(),
            event_bus: EventBusKind::Memory,
            jwt_secret: "test-secret-test-secret".into(),
            jwt_issuer: "parley".into(),
            jwt_audience: "parley-web".into(),
            jwt_expiry: 900,
            webhook_api_key: None,
            sse_channel_prefix: "sse:".into(),
            snapshot_ttl: Duration::from_secs(1200),
            sse_heartbeat: Duration::from_secs(20),
            sse_retry_ms: 15_000,
            idempotency_ttl: Duration::from_secs(86_400),
            backend_url: None,
            backend_timeout: Duration::from_secs(60),
            observability: ObservabilityConfig {
                enabled: false,
                otlp_endpoint: "http://localhost:4317".into(),
                service_name: "parley-server-test".into(),
                trace_sample_ratio: 1.0,
                log_level: "debug".into(),
            },
        }
    }
}
