//! Action failure taxonomy.
//!
//! Every way a turn can fail maps to one wire `code`, a retryable flag and a
//! short user-facing message. Detail from collaborators is logged, never sent.

use thiserror::Error;

use crate::collaborators::CollaboratorError;

#[derive(Debug, Error)]
pub enum ActionError {
    /// Required parameter missing or blank.
    #[error("Missing parameter: {0}")]
    MissingParam(String),

    /// Input present but unusable; carries its own code.
    #[error("Invalid input ({code}): {message}")]
    Invalid { code: &'static str, message: String },

    /// Deadline elapsed while waiting on a collaborator.
    #[error("Upstream call timed out")]
    Timeout,

    /// Collaborator returned a failure.
    #[error("Upstream call failed: {0}")]
    Upstream(CollaboratorError),

    /// No handler registered for the tag.
    #[error("Unknown action tag: {0}")]
    UnknownTag(String),

    /// Fault inside the service itself.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CollaboratorError> for ActionError {
    fn from(e: CollaboratorError) -> Self {
        match e {
            // A client timeout is the same condition as the turn deadline.
            CollaboratorError::Timeout(_) => Self::Timeout,
            other => Self::Upstream(other),
        }
    }
}

impl ActionError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingParam(_) => "MISSING_PARAM",
            Self::Invalid { code, .. } => *code,
            Self::Timeout => "UPSTREAM_TIMEOUT",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::UnknownTag(_) => "UNKNOWN_TAG",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether resubmitting the same turn may succeed.
    pub const fn retryable(&self) -> bool {
        matches!(
            self,
            Self::MissingParam(_) | Self::Invalid { .. } | Self::Timeout
        )
    }

    /// Message shown to the end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingParam(name) => format!("Falta el dato requerido: {name}."),
            Self::Invalid { message, .. } => message.clone(),
            Self::Timeout => {
                "Estoy tardando más de lo normal. Por favor, intente de nuevo en unos segundos."
                    .to_string()
            }
            Self::Upstream(_) => {
                "No pude completar la operación en este momento. Por favor, intente más tarde."
                    .to_string()
            }
            Self::UnknownTag(tag) => format!("Acción no reconocida: {tag}"),
            Self::Internal(_) => "Ocurrió un error inesperado.".to_string(),
        }
    }
}
