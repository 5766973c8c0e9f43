//! Auth error types.

/// Why a credential was rejected or could not be produced.
///
/// Every validation variant means "unauthenticated" to callers; the variants
/// only exist so logs can say why.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No credential was presented.
    #[error("missing credential")]
    Missing,

    /// `Authorization` header did not use the `Bearer` scheme.
    #[error("invalid authorization scheme (expected Bearer)")]
    InvalidScheme,

    /// Token could not be decoded.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Signature does not match the configured secret.
    #[error("invalid token signature")]
    InvalidSignature,

    /// Issuer claim does not match the configured issuer.
    #[error("invalid token issuer")]
    InvalidIssuer,

    /// `exp` is in the past.
    #[error("token expired")]
    Expired,

    /// Token encoding failed during issuance.
    #[error("failed to encode token: {0}")]
    Encoding(String),
}

impl AuthError {
    /// Stable machine-readable code for logs and API bodies.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Missing => "MISSING_CREDENTIAL",
            Self::InvalidScheme => "INVALID_SCHEME",
            Self::Malformed(_) => "MALFORMED_TOKEN",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::InvalidIssuer => "INVALID_ISSUER",
            Self::Expired => "TOKEN_EXPIRED",
            Self::Encoding(_) => "TOKEN_ENCODING",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match e.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidIssuer => Self::InvalidIssuer,
            _ => Self::Malformed(e.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_display() {
        assert_eq!(AuthError::Expired.to_string(), "token expired");
    }

    #[test]
    fn malformed_display_includes_reason() {
        let err = AuthError::Malformed("InvalidToken".into());
        assert!(err.to_string().contains("InvalidToken"));
    }

    #[test]
    fn codes_are_screaming_snake_case() {
        let errs = [
            AuthError::Missing,
            AuthError::InvalidScheme,
            AuthError::Malformed(String::new()),
            AuthError::InvalidSignature,
            AuthError::InvalidIssuer,
            AuthError::Expired,
            AuthError::Encoding(String::new()),
        ];
        for err in errs {
            assert!(
                err.code().chars().all(|c| c.is_ascii_uppercase() || c == '_'),
                "code '{}' must be SCREAMING_SNAKE_CASE",
                err.code()
            );
        }
    }

    #[test]
    fn jwt_expired_kind_maps_to_expired() {
        let e = jsonwebtoken::errors::Error::from(
            jsonwebtoken::errors::ErrorKind::ExpiredSignature,
        );
        assert_eq!(AuthError::from(e), AuthError::Expired);
    }
}
