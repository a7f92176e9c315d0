//! Fulfillment Webhook
//!
//! `POST /cx/fulfillment`, called by the conversational agent for every
//! action. Answers at once with the acknowledgment and the form parameters to
//! clear; the action's progress travels over the session stream.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::dispatch::{Params, TurnRequest};

/// Namespace for webhook message ids in the idempotency store.
const SOURCE: &str = "cx";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentRequest {
    #[serde(default)]
    pub fulfillment_info: Option<FulfillmentInfo>,
    #[serde(default)]
    pub session_info: Option<SessionInfo>,
    /// Raw user utterance, when the agent forwards it.
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FulfillmentInfo {
    #[serde(default)]
    pub tag: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentResponse {
    pub fulfillment_response: ResponseMessages,
    pub session_info: ResponseSessionInfo,
    pub payload: AcceptedPayload,
}

/// Always empty; replies go out over the stream.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ResponseMessages {
    pub messages: Vec<Value>,
}

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ResponseSessionInfo {
    /// Parameters to clear, each mapped to `null`.
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedPayload {
    pub accepted: bool,
    pub turn_id: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

/// Accept one action call.
#[tracing::instrument(skip(state, body), fields(tag))]
pub async fn fulfill(
    State(state): State<AppState>,
    Json(body): Json<FulfillmentRequest>,
) -> Result<Json<FulfillmentResponse>, ApiError> {
    let tag = body
        .fulfillment_info
        .and_then(|info| info.tag)
        .unwrap_or_default();
    tracing::Span::current().record("tag", tag.as_str());

    let params = Params::from(body.session_info.unwrap_or_default().parameters);

    let session_id = params
        .optional_str("sessionId")
        .and_then(|s| Uuid::parse_str(&s).ok())
        .ok_or_else(|| ApiError::BadRequest("sessionId parameter must be a UUID".into()))?;
    let turn_id = params.optional_str("turnId");
    let message_id = params.optional_str("messageId");
    debug!(%session_id, params = params.len(), has_text = body.text.is_some(), "Fulfillment call");

    let accepted = state
        .dispatcher
        .accept(TurnRequest {
            tag,
            session_id,
            turn_id,
            params,
            message_id,
            source: SOURCE,
        })
        .await;

    info!(
        %session_id,
        turn_id = %accepted.turn_id,
        duplicate = accepted.duplicate,
        "Turn accepted"
    );

    let resets = accepted
        .resets
        .iter()
        .map(|name| ((*name).to_string(), Value::Null))
        .collect();

    Ok(Json(FulfillmentResponse {
        fulfillment_response: ResponseMessages::default(),
        session_info: ResponseSessionInfo { parameters: resets },
        payload: AcceptedPayload {
            accepted: true,
            turn_id: accepted.turn_id,
            duplicate: accepted.duplicate,
        },
    }))
}
