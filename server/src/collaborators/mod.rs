//! External Collaborators
//!
//! Narrow call/result contracts for the services actions depend on: session
//! resolution, intent detection for inbound chat messages, case lookup,
//! complaint intake, retrieval-augmented answering, verification codes and
//! notification delivery. The dispatch core never sees
//! their internals.

mod http;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use http::HttpBackend;
pub use memory::MemoryBackend;

/// Collaborator failure.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Client-side timeout elapsed before the service answered.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Request never produced a response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Service answered with a failure status.
    #[error("Service returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body did not match the contract.
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// Service rejected the input.
    #[error("Rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Status {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            Self::Transport(e.to_string())
        }
    }
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Conversation with one end user on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub channel: String,
    pub channel_user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// Case file as exposed by the case directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRecord {
    pub number: String,
    pub status: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Complaint form collected over the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComplaint {
    pub session_id: Uuid,
    pub channel_user_id: String,
    pub name: String,
    pub national_id: String,
    pub location: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplaintReceipt {
    pub id: i64,
}

/// Inbound chat message forwarded to the conversational agent. The agent
/// calls the fulfillment webhook back with the same `turn_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentRequest {
    pub session_id: Uuid,
    pub channel_user_id: String,
    pub turn_id: String,
    pub text: String,
}

#[async_trait]
pub trait IntentService: Send + Sync {
    /// Replies the agent produced before handing the turn to the webhook,
    /// in order. Empty when it went straight to fulfillment.
    async fn detect_intent(&self, request: &IntentRequest) -> CollaboratorResult<Vec<String>>;
}

#[async_trait]
pub trait SessionDirectory: Send + Sync {
    async fn get_or_create(&self, channel: &str, channel_user_id: &str)
        -> CollaboratorResult<Session>;
}

#[async_trait]
pub trait CaseDirectory: Send + Sync {
    /// `Ok(None)` when no case has that number.
    async fn find_case(&self, number: &str) -> CollaboratorResult<Option<CaseRecord>>;
}

#[async_trait]
pub trait ComplaintIntake: Send + Sync {
    async fn create_complaint(&self, complaint: NewComplaint)
        -> CollaboratorResult<ComplaintReceipt>;
}

#[async_trait]
pub trait AnswerService: Send + Sync {
    /// Answer a free-text question in the context of a session.
    /// `Ok(None)` when nothing relevant was found.
    async fn answer(&self, session_id: Uuid, question: &str) -> CollaboratorResult<Option<String>>;
}

#[async_trait]
pub trait VerificationService: Send + Sync {
    /// Generate and store a short-lived code bound to a case.
    async fn issue_code(&self, case_number: &str) -> CollaboratorResult<String>;

    /// Check a code; valid codes are consumed.
    async fn validate_code(&self, case_number: &str, code: &str) -> CollaboratorResult<bool>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_verification_code(
        &self,
        email: &str,
        case_number: &str,
        code: &str,
    ) -> CollaboratorResult<()>;
}

/// Handles to every collaborator. Cheap to clone.
#[derive(Clone)]
pub struct Services {
    pub sessions: Arc<dyn SessionDirectory>,
    pub intents: Arc<dyn IntentService>,
    pub cases: Arc<dyn CaseDirectory>,
    pub complaints: Arc<dyn ComplaintIntake>,
    pub answers: Arc<dyn AnswerService>,
    pub verification: Arc<dyn VerificationService>,
    pub notifier: Arc<dyn Notifier>,
}

impl Services {
    /// Route every contract to one backend implementing all of them.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: SessionDirectory
            + IntentService
            + CaseDirectory
            + ComplaintIntake
            + AnswerService
            + VerificationService
            + Notifier
            + 'static,
    {
        Self {
            sessions: backend.clone(),
            intents: backend.clone(),
            cases: backend.clone(),
            complaints: backend.clone(),
            answers: backend.clone(),
            verification: backend.clone(),
            notifier: backend,
        }
    }
}
