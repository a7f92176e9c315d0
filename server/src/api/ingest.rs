//! Web chat ingest: forwards an authenticated user message to the agent and
//! streams the agent's immediate replies as acks of a fresh turn.

use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::auth::{bearer_token, validate_stream_token, AuthError};
use crate::collaborators::IntentRequest;
use crate::events::TurnEmitter;

const WEB_CHANNEL: &str = "web";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestMessage {
    #[serde(default)]
    pub channel_user_id: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub accepted: bool,
    pub mode: String,
    pub channel: String,
    pub session_id: Uuid,
    pub turn_id: String,
}

/// `POST /ingest/web`
#[tracing::instrument(skip(state, headers, body))]
pub async fn web(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<IngestMessage>,
) -> Result<Json<IngestResponse>, ApiError> {
    let token = bearer_token(&headers)?.ok_or(AuthError::MissingCredential)?;
    let claims = validate_stream_token(token, &state.config)?;

    if !claims.channel.eq_ignore_ascii_case(WEB_CHANNEL) {
        warn!(channel = %claims.channel, "Ingest token issued for another channel");
        return Err(AuthError::CallerMismatch.into());
    }
    if claims.sub != body.channel_user_id {
        warn!(session_id = %claims.sid, "Ingest token subject does not match body");
        return Err(AuthError::CallerMismatch.into());
    }

    let session = state
        .services
        .sessions
        .get_or_create(WEB_CHANNEL, &body.channel_user_id)
        .await?;
    if session.id != claims.sid {
        warn!(
            token_sid = %claims.sid,
            session_id = %session.id,
            "Token session differs from stored session, using stored"
        );
    }

    let turn_id = Uuid::new_v4().to_string();
    let replies = state
        .services
        .intents
        .detect_intent(&IntentRequest {
            session_id: session.id,
            channel_user_id: body.channel_user_id.clone(),
            turn_id: turn_id.clone(),
            text: body.text,
        })
        .await?;

    let emitter = TurnEmitter::unsequenced(state.bus.clone(), session.id, &turn_id);
    for reply in replies.into_iter().filter(|r| !r.trim().is_empty()) {
        debug!(turn_id = %turn_id, "Forwarding agent reply as ack");
        emitter.ack(reply, Some(json!({ "source": "cx" }))).await;
    }

    info!(session_id = %session.id, turn_id = %turn_id, "Message ingested");

    Ok(Json(IngestResponse {
        accepted: true,
        mode: "message".to_string(),
        channel: WEB_CHANNEL.to_string(),
        session_id: session.id,
        turn_id,
    }))
}
