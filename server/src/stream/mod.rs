//! Session Event Stream
//!
//! `GET /stream?sessionId=..&access_token=..` (or a Bearer header) opens a
//! server-sent event stream for one session:
//!
//! 1. credential checked against the session, nothing sent on failure
//! 2. retry hint and `ready`
//! 3. the session's latest turn snapshot, if any
//! 4. live events until the client goes away
//!
//! The live subscription is opened before the snapshot is read. Live events
//! of the replayed turn that do not come after the snapshot (by sequence
//! number) are skipped, so the client sees no gap and no duplicate.
//!
//! Idle connections carry `:hb` comments at the configured interval.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header::HeaderName, HeaderMap, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{ApiError, AppState};
use crate::auth::{authorize_session, bearer_token, AuthError};
use crate::events::{EventBus, TurnEvent};

/// Payload of the `ready` control event.
pub const READY_PAYLOAD: &str = r#"{"ok":true}"#;

/// Heartbeat comment text.
pub const HEARTBEAT: &str = "hb";

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub access_token: Option<String>,
}

/// Open the event stream for a session.
#[tracing::instrument(skip(state, query, headers))]
pub async fn stream_session(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session_id = query
        .session_id
        .as_deref()
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .ok_or_else(|| ApiError::BadRequest("sessionId must be a UUID".into()))?;

    let token = match query.access_token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => token,
        None => bearer_token(&headers)?.ok_or(AuthError::MissingCredential)?,
    };
    let claims = authorize_session(token, session_id, &state.config)?;

    info!(%session_id, channel = %claims.channel, "Stream opened");

    let events = session_events(
        state.bus.clone(),
        session_id,
        Duration::from_millis(state.config.sse_retry_ms),
    )
    .take_until(state.shutdown.clone().cancelled_owned());
    let sse = Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(state.config.sse_heartbeat)
            .text(HEARTBEAT),
    );

    Ok((
        [(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        )],
        sse,
    )
        .into_response())
}

/// Frame for a decoded event; `None` if it cannot be re-encoded.
fn frame(event: &TurnEvent) -> Option<Event> {
    match event.to_json() {
        Ok(json) => Some(Event::default().event(event.name()).data(json)),
        Err(e) => {
            warn!(turn_id = %event.turn_id, "Failed to encode replay event: {}", e);
            None
        }
    }
}

fn session_events(
    bus: std::sync::Arc<dyn EventBus>,
    session_id: Uuid,
    retry: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        yield Ok(Event::default().retry(retry).comment("open"));
        yield Ok(Event::default().event("ready").data(READY_PAYLOAD));

        let mut live = match bus.subscribe(session_id).await {
            Ok(live) => live,
            Err(e) => {
                warn!(%session_id, "Subscription failed, closing stream: {}", e);
                return;
            }
        };

        let mut replayed: Option<TurnEvent> = None;
        match bus.last_turn(session_id).await {
            Ok(Some(turn_id)) => match bus.last_snapshot(session_id, &turn_id).await {
                Ok(Some(snapshot)) => {
                    if let Some(event) = frame(&snapshot) {
                        debug!(%session_id, %turn_id, "Replaying snapshot");
                        yield Ok(event);
                    }
                    replayed = Some(snapshot);
                }
                Ok(None) => {}
                Err(e) => warn!(%session_id, "Snapshot read failed: {}", e),
            },
            Ok(None) => {}
            Err(e) => warn!(%session_id, "Last turn read failed: {}", e),
        }

        while let Some(raw) = live.next().await {
            let event = match TurnEvent::from_json(&raw) {
                Ok(event) => event,
                Err(e) => {
                    warn!(%session_id, "Dropping malformed event: {}", e);
                    continue;
                }
            };

            if let Some(snapshot) = &replayed {
                if event.turn_id == snapshot.turn_id && !event.is_after(snapshot) {
                    continue;
                }
            }

            if let Some(frame) = frame(&event) {
                yield Ok(frame);
            }
        }

        debug!(%session_id, "Live subscription ended");
    }
}
