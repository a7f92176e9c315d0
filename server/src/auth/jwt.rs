//! Stream Credential Generation and Validation
//!
//! HS256 tokens binding one client to one session. The `sid` claim is the
//! only thing the streaming endpoint authorizes against.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{AuthError, AuthResult};
use crate::config::Config;

/// Stream credential claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject (channel user id).
    pub sub: String,
    /// Session the bearer may stream.
    pub sid: Uuid,
    /// Channel the session lives on.
    pub channel: String,
    pub iss: String,
    pub aud: String,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
}

/// Issued credential.
#[derive(Debug)]
pub struct StreamToken {
    pub token: String,
    /// Validity in seconds.
    pub expires_in: i64,
}

/// Issue a credential for streaming `session_id`.
pub fn issue_stream_token(
    config: &Config,
    session_id: Uuid,
    channel: &str,
    channel_user_id: &str,
) -> AuthResult<StreamToken> {
    let now = Utc::now();

    let claims = Claims {
        sub: channel_user_id.to_string(),
        sid: session_id,
        channel: channel.to_string(),
        iss: config.jwt_issuer.clone(),
        aud: config.jwt_audience.clone(),
        exp: (now + Duration::seconds(config.jwt_expiry)).timestamp(),
        iat: now.timestamp(),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?;

    Ok(StreamToken {
        token,
        expires_in: config.jwt_expiry,
    })
}

/// Validate a credential and decode its claims.
pub fn validate_stream_token(token: &str, config: &Config) -> AuthResult<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;
    validation.set_issuer(&[config.jwt_issuer.as_str()]);
    validation.set_audience(&[config.jwt_audience.as_str()]);

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::InvalidToken,
    })?;

    Ok(token_data.claims)
}

/// Validate `token` and require it to be scoped to `session_id`.
pub fn authorize_session(token: &str, session_id: Uuid, config: &Config) -> AuthResult<Claims> {
    let claims = validate_stream_token(token, config)?;
    if claims.sid != session_id {
        return Err(AuthError::SessionMismatch);
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_token_authorizes_its_session_only() {
        let config = Config::default_for_test();
        let session_id = Uuid::new_v4();
        let issued = issue_stream_token(&config, session_id, "web", "user-1").unwrap();
        assert_eq!(issued.expires_in, 900);

        let claims = authorize_session(&issued.token, session_id, &config).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.channel, "web");

        let other = authorize_session(&issued.token, Uuid::new_v4(), &config);
        assert!(matches!(other, Err(AuthError::SessionMismatch)));
    }

    #[test]
    fn test_expired_token_is_reported_as_expired() {
        let mut config = Config::default_for_test();
        config.jwt_expiry = -60;
        let issued = issue_stream_token(&config, Uuid::new_v4(), "web", "u").unwrap();

        let result = validate_stream_token(&issued.token, &config);
        assert!(matches!(result, Err(AuthError::TokenExpired)));
    }

    #[test]
    fn test_wrong_secret_or_audience_is_invalid() {
        let config = Config::default_for_test();
        let issued = issue_stream_token(&config, Uuid::new_v4(), "web", "u").unwrap();

        let mut other_secret = Config::default_for_test();
        other_secret.jwt_secret = "another-secret-another-secret".into();
        assert!(matches!(
            validate_stream_token(&issued.token, &other_secret),
            Err(AuthError::InvalidToken)
        ));

        let mut other_audience = Config::default_for_test();
        other_audience.jwt_audience = "admin-console".into();
        assert!(matches!(
            validate_stream_token(&issued.token, &other_audience),
            Err(AuthError::InvalidToken)
        ));

        assert!(matches!(
            validate_stream_token("not-a-jwt", &config),
            Err(AuthError::InvalidToken)
        ));
    }
}
