//! Session bootstrap: resolves the caller's session and issues the credential
//! for its event stream.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::auth::issue_stream_token;

fn default_channel() -> String {
    "web".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapRequest {
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default)]
    pub channel_user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapResponse {
    pub session_id: Uuid,
    pub token: String,
    /// Token lifetime in seconds.
    pub expires_in: i64,
}

/// `POST /sessions`
#[tracing::instrument(skip(state, body))]
pub async fn bootstrap(
    State(state): State<AppState>,
    Json(body): Json<BootstrapRequest>,
) -> Result<Json<BootstrapResponse>, ApiError> {
    let channel = body.channel.trim();
    let channel_user_id = body.channel_user_id.trim();
    if channel.is_empty() || channel_user_id.is_empty() {
        return Err(ApiError::BadRequest(
            "channel and channelUserId are required".into(),
        ));
    }

    let session = state
        .services
        .sessions
        .get_or_create(channel, channel_user_id)
        .await?;
    let issued = issue_stream_token(
        &state.config,
        session.id,
        &session.channel,
        &session.channel_user_id,
    )?;

    info!(session_id = %session.id, channel = %session.channel, "Session bootstrapped");

    Ok(Json(BootstrapResponse {
        session_id: session.id,
        token: issued.token,
        expires_in: issued.expires_in,
    }))
}
