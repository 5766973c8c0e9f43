//! Bearer-token extractor for the task routes.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use taskfeed_auth::{AuthError, extract_bearer};
use taskfeed_core::UserId;

use super::error::ApiError;
use crate::server::AppState;

/// The authenticated caller of a request.
#[derive(Clone, Debug)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::Missing)?
            .to_str()
            .map_err(|_| AuthError::Malformed("non-ASCII authorization header".into()))?;
        let token = extract_bearer(header)?;
        let claim = state.validator.validate(token)?;
        Ok(Self(claim.user_id))
    }
}
