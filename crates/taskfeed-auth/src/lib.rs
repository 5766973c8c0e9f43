//! # taskfeed-auth
//!
//! Short-lived bearer credentials binding a request or a WebSocket connection
//! to a user identity.
//!
//! - [`TokenValidator`]: the validation contract consumed by the connection
//!   registry and the HTTP extractor
//! - [`JwtTokenService`]: HS256 implementation that also issues tokens
//! - [`SessionClaim`]: what a successful validation yields
//!
//! Password verification and user registration live outside this crate;
//! tokens are minted for an already-known user id.

#![deny(unsafe_code)]

pub mod errors;
pub mod token;

pub use errors::AuthError;
pub use token::{
    DEFAULT_TOKEN_TTL_SECS, JwtTokenService, SessionClaim, TokenValidator, extract_bearer,
};
