//! Mock sign-in and bearer authentication
//!
//! `POST /api/auth/signin` takes HTTP Basic credentials and, when they match a
//! hard-coded account, answers with a JSON string holding an unsigned token,
//! the same response shape as the upstream platform's sign-in endpoint.
//! Query requests then present that token as `Authorization: Bearer ...`.

use axum::{
    Json,
    extract::{FromRequestParts, State},
    http::{HeaderMap, header, request::Parts},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use xpboard_core::User;
use xpboard_session::token::{self, Claims, TokenStatus};

use crate::AppState;
use crate::error::ApiError;

/// Claim upstream tokens use for the user id when `sub` is absent
const HASURA_CLAIMS: &str = "https://hasura.io/jwt/claims";
const HASURA_USER_ID: &str = "x-hasura-user-id";

/// Caller identity taken from a valid bearer token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        authenticate_bearer(&parts.headers, Utc::now().timestamp_millis())
    }
}

/// Resolve the caller from an `Authorization: Bearer` header at `now_ms`
pub fn authenticate_bearer(headers: &HeaderMap, now_ms: i64) -> Result<Principal, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthenticated("Missing bearer token".to_string()))?;

    if token::status_at(Some(token), now_ms) != TokenStatus::Valid {
        debug!("Rejecting expired or malformed bearer token");
        return Err(ApiError::Unauthenticated(
            "Token expired or invalid".to_string(),
        ));
    }

    // Valid status implies the payload decodes
    let claims = token::decode_payload(token)
        .map_err(|e| ApiError::Unauthenticated(format!("Token invalid: {}", e)))?;

    subject(&claims)
        .map(|user_id| Principal { user_id })
        .ok_or_else(|| ApiError::Unauthenticated("Token has no user id".to_string()))
}

/// User id from `sub`, falling back to the Hasura claims namespace
fn subject(claims: &Claims) -> Option<i64> {
    let sub = claims.get("sub").or_else(|| {
        claims
            .get(HASURA_CLAIMS)
            .and_then(|ns| ns.get(HASURA_USER_ID))
    })?;

    match sub {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

/// Build the token handed out at sign-in
pub fn issue_token(user: &User, ttl_secs: u64, now: DateTime<Utc>) -> String {
    let iat = now.timestamp();
    let exp = iat.saturating_add(i64::try_from(ttl_secs).unwrap_or(i64::MAX));
    token::encode_unsigned(&json!({
        "sub": user.id.to_string(),
        "name": user.login,
        "iat": iat,
        "exp": exp,
        HASURA_CLAIMS: { HASURA_USER_ID: user.id.to_string() }
    }))
}

/// Split `Authorization: Basic base64(identifier:password)`
pub fn parse_basic(headers: &HeaderMap) -> Result<(String, String), ApiError> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .ok_or_else(|| ApiError::Unauthenticated("Missing basic credentials".to_string()))?;

    let decoded = STANDARD
        .decode(encoded.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| ApiError::BadRequest("Malformed basic credentials".to_string()))?;

    let (identifier, password) = decoded
        .split_once(':')
        .ok_or_else(|| ApiError::BadRequest("Malformed basic credentials".to_string()))?;

    if identifier.is_empty() || password.is_empty() {
        return Err(ApiError::BadRequest(
            "Please fill in all fields".to_string(),
        ));
    }

    Ok((identifier.to_string(), password.to_string()))
}

/// Mock sign-in handler
pub async fn signin(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<String>, ApiError> {
    let (identifier, password) = parse_basic(&headers)?;

    let user = state
        .repository
        .authenticate(&identifier, &password)
        .await
        .map_err(|e| {
            warn!("Sign-in rejected for '{}'", identifier);
            ApiError::from(e)
        })?;

    info!("User '{}' signed in", user.login);
    Ok(Json(issue_token(
        &user,
        state.config.token_ttl_secs,
        Utc::now(),
    )))
}
