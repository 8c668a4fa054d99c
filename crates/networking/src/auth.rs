//! Credential resolution
//!
//! Both the HTTP routes and the live socket resolve an opaque bearer
//! credential to a user id through an [`Authenticator`]. The shipped
//! implementation verifies HS256 JWTs whose `sub` claim is the user id.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while resolving a credential
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was presented
    #[error("Missing credential")]
    Missing,

    /// Credential failed verification
    #[error("Invalid credential: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),

    /// Credential verified but names no user
    #[error("Credential has no subject")]
    NoSubject,
}

/// Result type for authentication
pub type Result<T> = std::result::Result<T, AuthError>;

/// Resolves a credential to a user id
#[cfg_attr(test, mockall::automock)]
pub trait Authenticator: Send + Sync {
    /// Verify `token` and return the user id it names
    fn authenticate(&self, token: &str) -> Result<String>;
}

/// JWT claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
}

/// HS256 JWT authenticator
pub struct JwtAuthenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl JwtAuthenticator {
    /// Default token lifetime
    pub const DEFAULT_TTL_HOURS: i64 = 24 * 7;

    /// Create an authenticator from a shared secret
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl: Duration::hours(Self::DEFAULT_TTL_HOURS),
        }
    }

    /// Set the lifetime of issued tokens
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Issue a token for `user_id`
    pub fn issue(&self, user_id: &str) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<String> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        if data.claims.sub.trim().is_empty() {
            return Err(AuthError::NoSubject);
        }
        Ok(data.claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_authenticate() {
        let auth = JwtAuthenticator::new(b"test_secret");
        let token = auth.issue("user-1").unwrap();
        assert_eq!(auth.authenticate(&token).unwrap(), "user-1");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = JwtAuthenticator::new(b"one").issue("user-1").unwrap();
        let err = JwtAuthenticator::new(b"two").authenticate(&token).unwrap_err();
        assert!(matches!(err, AuthError::Invalid(_)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let auth = JwtAuthenticator::new(b"test_secret").with_ttl(Duration::hours(-2));
        let token = auth.issue("user-1").unwrap();
        assert!(matches!(auth.authenticate(&token), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn test_missing_and_garbage_tokens() {
        let auth = JwtAuthenticator::new(b"test_secret");
        assert!(matches!(auth.authenticate(""), Err(AuthError::Missing)));
        assert!(matches!(auth.authenticate("not.a.jwt"), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn test_empty_subject_rejected() {
        let auth = JwtAuthenticator::new(b"test_secret");
        let token = auth.issue(" ").unwrap();
        assert!(matches!(auth.authenticate(&token), Err(AuthError::NoSubject)));
    }
}
