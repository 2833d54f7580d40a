//! Bearer-token verification and issuance.
//!
//! Tokens are HS256 JWTs signed with the shared `jwt_secret`. Verification
//! is a pure function of (token, current time, secret): no I/O, no shared
//! mutable state, safe to call from every request task at once.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::header::{AUTHORIZATION, HeaderMap};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::UserId;

/// The payload of a verified token.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// The authenticated user.
    pub sub: UserId,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
    /// Issued-at, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
}

/// Why a request failed authentication.
///
/// Both variants reach the client as the same 401 class; they stay distinct
/// so logs can tell "no credential" from "bad credential".
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum AuthError {
    #[error("authorization header is missing or malformed")]
    Missing,
    #[error("invalid token: {0}")]
    Invalid(InvalidToken),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum InvalidToken {
    #[error("expired")]
    Expired,
    #[error("bad signature")]
    BadSignature,
    #[error("malformed")]
    Malformed,
}

impl AuthError {
    /// Short, stable label for the `reason` log field.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Missing => "auth_missing",
            Self::Invalid(InvalidToken::Expired) => "auth_invalid_expired",
            Self::Invalid(InvalidToken::BadSignature) => "auth_invalid_signature",
            Self::Invalid(InvalidToken::Malformed) => "auth_invalid_format",
        }
    }
}

/// Extracts the credential from `Authorization: Bearer <token>`.
///
/// An absent header, a non-UTF-8 value, a missing separator, a scheme other
/// than `Bearer` (any case) or an empty token all yield [`AuthError::Missing`].
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::Missing)?;
    let (scheme, token) = value.trim().split_once(' ').ok_or(AuthError::Missing)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::Missing);
    }
    match token.trim() {
        "" => Err(AuthError::Missing),
        token => Ok(token),
    }
}

/// Checks signature, structure and expiry of bearer tokens.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is compared against an explicit `now` in `verify_at`, with
        // no leeway and `exp == now` counting as expired.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp"]);
        Self { key: DecodingKey::from_secret(secret.as_bytes()), validation }
    }

    /// Verifies `token` against the current system time.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_at(token, unix_now())
    }

    /// Verifies `token` as of `now` (seconds since the Unix epoch).
    pub fn verify_at(&self, token: &str, now: u64) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            AuthError::Invalid(match e.kind() {
                ErrorKind::InvalidSignature => InvalidToken::BadSignature,
                _ => InvalidToken::Malformed,
            })
        })?;
        if data.claims.exp <= now {
            return Err(AuthError::Invalid(InvalidToken::Expired));
        }
        Ok(data.claims)
    }
}

/// Signs tokens for login and registration.
pub struct TokenIssuer {
    key: EncodingKey,
    lifetime: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, lifetime: Duration) -> Self {
        Self { key: EncodingKey::from_secret(secret.as_bytes()), lifetime }
    }

    pub fn issue(&self, user: UserId) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue_at(user, unix_now())
    }

    /// Signs a token issued at `now`, expiring `lifetime` later.
    pub fn issue_at(&self, user: UserId, now: u64) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims { sub: user, exp: now + self.lifetime.as_secs(), iat: Some(now) };
        encode(&Header::new(Algorithm::HS256), &claims, &self.key)
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
