//! HS256 bearer tokens binding a request or connection to a user identity.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use taskfeed_core::UserId;
use tracing::debug;

use crate::errors::AuthError;

/// Default token lifetime in seconds.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 60 * 60;

/// Validated identity and expiry of a bearer credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionClaim {
    /// Authenticated user.
    pub user_id: UserId,
    /// When the credential stops being valid.
    pub expires_at: DateTime<Utc>,
}

/// Credential validation seam used by the connection registry and the HTTP
/// layer.
pub trait TokenValidator: Send + Sync {
    /// Validate `credential` and return the claim it carries.
    fn validate(&self, credential: &str) -> Result<SessionClaim, AuthError>;
}

/// JWT wire claims.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
    iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iss: Option<String>,
}

/// Issues and validates HS256 JWTs with a shared secret.
pub struct JwtTokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: Option<String>,
    ttl: Duration,
}

impl JwtTokenService {
    /// Create a service for `secret` with the default lifetime and no issuer.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            issuer: None,
            ttl: Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
        }
    }

    /// Require and stamp an `iss` claim.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();
        self.validation.set_issuer(&[issuer.as_str()]);
        self.issuer = Some(issuer);
        self
    }

    /// Override the lifetime of issued tokens.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Lifetime of issued tokens.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `user_id` valid for the configured lifetime.
    pub fn issue(&self, user_id: &UserId) -> Result<String, AuthError> {
        self.issue_expiring(user_id, Utc::now() + self.ttl)
    }

    /// Issue a token for `user_id` that expires at `expires_at`.
    pub fn issue_expiring(
        &self,
        user_id: &UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: expires_at.timestamp(),
            iat: Utc::now().timestamp(),
            iss: self.issuer.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Encoding(e.to_string()))
    }
}

impl TokenValidator for JwtTokenService {
    fn validate(&self, credential: &str) -> Result<SessionClaim, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::Missing);
        }
        let data = decode::<Claims>(credential, &self.decoding, &self.validation).map_err(|e| {
            let err = AuthError::from(e);
            debug!(code = err.code(), "token rejected");
            err
        })?;
        let claims = data.claims;
        if claims.sub.is_empty() {
            return Err(AuthError::Malformed("empty subject".into()));
        }
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| AuthError::Malformed("exp out of range".into()))?;
        Ok(SessionClaim {
            user_id: UserId::from(claims.sub),
            expires_at,
        })
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn extract_bearer(header: &str) -> Result<&str, AuthError> {
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidScheme)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::Missing);
    }
    Ok(token)
}
