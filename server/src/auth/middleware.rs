//! Authentication Middleware

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::api::AppState;

use super::error::AuthError;

/// Header carrying the webhook's shared key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Bearer token from the Authorization header, if any.
///
/// A present header in any other scheme is an error rather than "absent".
pub fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, AuthError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| AuthError::InvalidAuthHeader)?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(Some)
        .ok_or(AuthError::InvalidAuthHeader)
}

/// Constant-time byte comparison.
fn keys_match(expected: &[u8], provided: &[u8]) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    expected
        .iter()
        .zip(provided)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Middleware requiring `X-Api-Key` to match the configured webhook key.
///
/// Pass-through when no key is configured.
///
/// # Usage
///
/// ```ignore
/// Router::new()
///     .route("/cx/fulfillment", post(handler))
///     .layer(axum::middleware::from_fn_with_state(state, require_webhook_key))
/// ```
pub async fn require_webhook_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    if let Some(expected) = state.config.webhook_api_key.as_deref() {
        let provided = request
            .headers()
            .get(API_KEY_HEADER)
            .map(|v| v.as_bytes())
            .unwrap_or_default();

        if !keys_match(expected.as_bytes(), provided) {
            warn!(path = %request.uri().path(), "Rejected webhook call with bad API key");
            return Err(AuthError::InvalidApiKey);
        }
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Ok(None)));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).unwrap(), Some("abc.def"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert!(matches!(
            bearer_token(&headers),
            Err(AuthError::InvalidAuthHeader)
        ));
    }

    #[test]
    fn test_keys_match() {
        assert!(keys_match(b"secret", b"secret"));
        assert!(!keys_match(b"secret", b"secreT"));
        assert!(!keys_match(b"secret", b"secret2"));
        assert!(!keys_match(b"secret", b""));
    }
}
