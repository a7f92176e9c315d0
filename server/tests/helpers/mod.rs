//! Reusable test helpers for HTTP integration tests.
//!
//! Provides `TestApp` for sending requests through the full axum router on
//! the in-memory bus and backend, plus a reader for server-sent event bodies.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{self, Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use parley_server::actions;
use parley_server::api::{create_router, AppState};
use parley_server::auth::{issue_stream_token, API_KEY_HEADER};
use parley_server::collaborators::{MemoryBackend, Services};
use parley_server::config::Config;
use parley_server::dispatch::{Dispatcher, MemoryIdempotencyStore, SharedScopeFactory};
use parley_server::events::MemoryEventBus;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

/// Case seeded into every test backend.
pub const SEEDED_CASE: &str = "EXP-2024-0001";

/// Reply the test agent sends for every ingested message.
pub const AGENT_REPLY: &str = "Un momento, reviso su consulta.";

// ============================================================================
// Test App
// ============================================================================

/// A test application wrapping the full axum router.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub bus: Arc<MemoryEventBus>,
    pub backend: Arc<MemoryBackend>,
    pub config: Arc<Config>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(Config::default_for_test())
    }

    /// Create a test app with a custom config.
    pub fn with_config(config: Config) -> Self {
        let bus = Arc::new(MemoryEventBus::new(config.snapshot_ttl));
        let backend = Arc::new(
            MemoryBackend::new()
                .with_case(SEEDED_CASE, "En revisión", Some("vecino@example.com"))
                .with_answer("horario", "Atendemos de lunes a viernes de 8 a 16 horas.")
                .with_agent_reply(AGENT_REPLY),
        );
        let services = Services::from_backend(backend.clone());
        let dispatcher = Dispatcher::new(
            actions::default_registry(),
            bus.clone(),
            Arc::new(SharedScopeFactory::new(services.clone())),
            Arc::new(MemoryIdempotencyStore::new(config.idempotency_ttl)),
        );

        let state = AppState::new(config, bus.clone(), dispatcher, services);
        let config = state.config.clone();
        let router = create_router(state.clone());

        Self {
            router,
            state,
            bus,
            backend,
            config,
        }
    }

    /// Build an HTTP request with the given method and URI.
    pub fn request(method: Method, uri: &str) -> http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    /// Send a request through the router via `tower::ServiceExt::oneshot`.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot request failed")
    }

    /// POST a JSON body, adding the webhook key when one is configured.
    pub async fn post_json(&self, uri: &str, body: &Value) -> Response<Body> {
        let mut builder = Self::request(Method::POST, uri)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.config.webhook_api_key {
            builder = builder.header(API_KEY_HEADER, key.as_str());
        }
        self.oneshot(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    /// Stream credential for `session_id`.
    pub fn token_for(&self, session_id: Uuid) -> String {
        issue_stream_token(&self.config, session_id, "web", "citizen-1")
            .expect("Failed to issue stream token")
            .token
    }

    /// Open the event stream for `session_id` with a valid credential.
    pub async fn open_stream(&self, session_id: Uuid) -> Response<Body> {
        let uri = format!(
            "/stream?sessionId={session_id}&access_token={}",
            self.token_for(session_id)
        );
        self.oneshot(Self::request(Method::GET, &uri).body(Body::empty()).unwrap())
            .await
    }

    /// Wait until a stream has subscribed to the session's live events.
    pub async fn wait_for_subscriber(&self, session_id: Uuid) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.bus.subscriber_count(session_id) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stream never subscribed");
    }

    /// Wait for every accepted turn to finish.
    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.state.dispatcher.wait_idle())
            .await
            .expect("turns did not finish");
    }
}

/// Fulfillment webhook body for `tag`, with `sessionId` merged into `params`.
pub fn fulfillment_body(tag: &str, session_id: Uuid, params: Value) -> Value {
    let mut parameters = params;
    parameters["sessionId"] = json!(session_id.to_string());
    json!({
        "fulfillmentInfo": { "tag": tag },
        "sessionInfo": { "session": "projects/p/agents/a/sessions/s", "parameters": parameters },
    })
}

/// Parse a response body as JSON.
pub async fn body_to_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to collect response body")
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        let preview = String::from_utf8_lossy(&bytes);
        panic!("Failed to parse response as JSON: {e}\nBody: {preview}")
    })
}

// ============================================================================
// Server-sent events
// ============================================================================

/// One parsed SSE frame.
#[derive(Debug, Default, Clone)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    pub comments: Vec<String>,
    pub retry: Option<u64>,
}

impl SseFrame {
    fn parse(block: &str) -> Self {
        let mut frame = Self::default();
        for line in block.lines() {
            if let Some(comment) = line.strip_prefix(':') {
                frame.comments.push(comment.trim().to_string());
                continue;
            }
            let (field, value) = line.split_once(':').unwrap_or((line, ""));
            let value = value.strip_prefix(' ').unwrap_or(value);
            match field {
                "event" => frame.event = Some(value.to_string()),
                "data" => {
                    if !frame.data.is_empty() {
                        frame.data.push('\n');
                    }
                    frame.data.push_str(value);
                }
                "retry" => frame.retry = value.trim().parse().ok(),
                _ => {}
            }
        }
        frame
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.data)
            .unwrap_or_else(|e| panic!("frame data is not JSON: {e}\nData: {}", self.data))
    }

    pub fn is_heartbeat(&self) -> bool {
        self.event.is_none() && self.data.is_empty() && self.comments.iter().any(|c| c == "hb")
    }
}

/// Incremental reader over a streaming response body.
pub struct SseReader {
    body: Body,
    buffer: String,
}

impl SseReader {
    pub fn new(response: Response<Body>) -> Self {
        Self {
            body: response.into_body(),
            buffer: String::new(),
        }
    }

    /// Next frame, or `None` when the stream ended or nothing arrived in time.
    pub async fn next_frame(&mut self, wait: Duration) -> Option<SseFrame> {
        loop {
            let normalized = self.buffer.replace("\r\n", "\n");
            if let Some(end) = normalized.find("\n\n") {
                let block = normalized[..end].to_string();
                self.buffer = normalized[end + 2..].to_string();
                return Some(SseFrame::parse(&block));
            }

            match tokio::time::timeout(wait, self.body.frame()).await {
                Ok(Some(Ok(frame))) => {
                    if let Ok(data) = frame.into_data() {
                        self.buffer.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Ok(Some(Err(e))) => panic!("stream body error: {e}"),
                Ok(None) | Err(_) => return None,
            }
        }
    }

    /// Next frame that carries a named event, skipping comments.
    pub async fn next_event(&mut self, wait: Duration) -> Option<SseFrame> {
        loop {
            let frame = self.next_frame(wait).await?;
            if frame.event.is_some() {
                return Some(frame);
            }
        }
    }

    /// Named events up to and including the next `done`.
    pub async fn until_done(&mut self, wait: Duration) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_event(wait).await {
            let done = frame.event.as_deref() == Some("done");
            frames.push(frame);
            if done {
                break;
            }
        }
        frames
    }

    /// Whether the body ends within `wait`, draining anything still queued.
    pub async fn is_closed(&mut self, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.body.frame()).await {
                Ok(None) => return true,
                Ok(Some(_)) => continue,
                Err(_) => return false,
            }
        }
    }
}
