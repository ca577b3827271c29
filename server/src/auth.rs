//! Session-token authentication
//!
//! Clients present a signed session token in the `Cookie` header, both at
//! WebSocket handshake time and on the HTTP read paths. The relay only
//! verifies tokens; issuing them belongs to the login service that shares
//! the secret.

use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Stable user identifier, owned by the identity service
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Display name at token issue time
    pub username: String,
    /// Optional expiry (unix seconds); enforced when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// Distinct handshake rejection reasons. Every variant terminates the
/// handshake; none fall through to an unauthenticated connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The request carried no `Cookie` header at all
    #[error("no cookie header")]
    MissingCookieHeader,

    /// Cookie header present but no `token=` entry in it
    #[error("no token cookie")]
    MissingToken,

    /// `token=` entry present but empty
    #[error("empty token")]
    EmptyToken,

    /// Signature verification failed, or the token is malformed or expired
    #[error("invalid token")]
    InvalidToken,
}

/// Extract the `token` value from a semicolon-separated cookie string.
pub fn token_from_cookie_header(cookies: &str) -> Result<&str, AuthError> {
    let token = cookies
        .split(';')
        .filter_map(|pair| pair.trim().strip_prefix("token="))
        .next()
        .ok_or(AuthError::MissingToken)?;

    if token.is_empty() {
        return Err(AuthError::EmptyToken);
    }
    Ok(token)
}

/// Verify a session token's signature and decode its claims.
///
/// Tokens carry no `exp` claim as issued today and therefore never expire;
/// when an `exp` claim is present it is enforced.
pub fn verify_token(token: &str, secret: &[u8]) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();

    decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
        .map_err(|_| AuthError::InvalidToken)
}

/// Authenticate a request from its headers.
pub fn authenticate(headers: &HeaderMap, secret: &[u8]) -> Result<Claims, AuthError> {
    let cookies = headers
        .get(header::COOKIE)
        .ok_or(AuthError::MissingCookieHeader)?
        .to_str()
        .map_err(|_| AuthError::MissingCookieHeader)?;

    let token = token_from_cookie_header(cookies)?;
    verify_token(token, secret)
}
