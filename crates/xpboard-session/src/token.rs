//! Bearer token decoding and expiry
//!
//! Tokens are JWT-shaped (`header.payload.signature`). Only the payload is
//! read; the signature is never verified here. A token is usable when its
//! payload decodes to a JSON object carrying a numeric `exp` (Unix seconds)
//! that lies strictly in the future.

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Standard alphabet, tolerant of non-zero trailing bits. The payload is
/// translated from the URL-safe alphabet and padded before decoding.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Decoded token payload
pub type Claims = Map<String, Value>;

/// Why a token could not be decoded
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("expected 3 dot-separated segments, found {0}")]
    SegmentCount(usize),

    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// Outcome of a validity check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// Nothing stored
    NoToken,
    /// Decodes and `exp` is in the future
    Valid,
    /// Undecodable, missing `exp`, or `exp` not in the future
    ExpiredOrMalformed,
}

impl TokenStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenStatus::Valid)
    }
}

/// Decode the payload segment of a token without verifying it
pub fn decode_payload(token: &str) -> Result<Claims, TokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(TokenError::SegmentCount(parts.len()));
    }

    let payload = parts[1];
    let padding = (4 - payload.len() % 4) % 4;
    let mut standard: String = payload
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    standard.push_str(&"=".repeat(padding));

    let bytes = PAYLOAD_ENGINE.decode(standard)?;
    let text = String::from_utf8(bytes)?;

    match serde_json::from_str(&text)? {
        Value::Object(claims) => Ok(claims),
        _ => Err(TokenError::NotAnObject),
    }
}

/// The `exp` claim in seconds, if present and numeric
pub fn expiry_secs(claims: &Claims) -> Option<f64> {
    claims.get("exp").and_then(Value::as_f64)
}

/// Classify a stored token at wall-clock time `now_ms` (Unix milliseconds).
///
/// Decode failures never escape: they are logged and reported as
/// `ExpiredOrMalformed`. An empty string counts as no token.
pub fn status_at(token: Option<&str>, now_ms: i64) -> TokenStatus {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return TokenStatus::NoToken;
    };

    let claims = match decode_payload(token) {
        Ok(claims) => claims,
        Err(e) => {
            debug!("Error decoding token: {}", e);
            return TokenStatus::ExpiredOrMalformed;
        }
    };

    match expiry_secs(&claims) {
        Some(exp) if (now_ms as f64) < exp * 1000.0 => TokenStatus::Valid,
        Some(_) => TokenStatus::ExpiredOrMalformed,
        None => {
            debug!("Token payload has no numeric exp claim");
            TokenStatus::ExpiredOrMalformed
        }
    }
}

/// Whether the token is unusable at `now_ms`. Undecodable tokens count as expired.
pub fn is_expired_at(token: &str, now_ms: i64) -> bool {
    status_at(Some(token), now_ms) != TokenStatus::Valid
}

/// When the token expires, if it carries a usable `exp`
pub fn expiration(token: &str) -> Option<DateTime<Utc>> {
    let claims = decode_payload(token).ok()?;
    let exp_ms = expiry_secs(&claims)? * 1000.0;
    DateTime::from_timestamp_millis(exp_ms as i64)
}

/// Time left before expiry; `None` when undecodable or already expired
pub fn time_until_expiration(token: &str, now_ms: i64) -> Option<Duration> {
    let claims = decode_payload(token).ok()?;
    let remaining_ms = expiry_secs(&claims)? * 1000.0 - now_ms as f64;
    if remaining_ms > 0.0 {
        Some(Duration::from_millis(remaining_ms as u64))
    } else {
        None
    }
}

/// Build an unsigned token carrying `claims`.
///
/// Used by the mock sign-in endpoint and by tests; nothing verifies the
/// signature segment.
pub fn encode_unsigned(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    let signature = URL_SAFE_NO_PAD.encode(b"unsigned");
    format!("{}.{}.{}", header, payload, signature)
}
