//! Authentication
//!
//! Stream credentials (HS256 JWT scoped to one session) and the shared-key
//! check on the fulfillment webhook.

mod error;
mod jwt;
mod middleware;

pub use error::{AuthError, AuthResult, ErrorResponse};
pub use jwt::{authorize_session, issue_stream_token, validate_stream_token, Claims, StreamToken};
pub use middleware::{bearer_token, require_webhook_key, API_KEY_HEADER};
