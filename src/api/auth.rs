// =============================================================================
// Bearer Token Authentication — Axum extractors
// =============================================================================
//
// `AgentBearer` extracts and validates `Authorization: Bearer <api_key>`
// against `agents.secret`, matching the spec's "matched against
// agents.secret exactly". `AdminBearer` guards the admin-only diagnostics
// endpoint against `config.admin_api_token`, carried over from the teacher's
// `AURORA_ADMIN_TOKEN`-checking extractor. Both compare in constant time.
// =============================================================================

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::store::{Agent, Store};

/// Compare two byte slices in constant time. Returns `true` if identical.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, axum::Json(body)).into_response()
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Validates the bearer token against an active agent's secret and yields
/// that agent.
pub struct AgentBearer(pub Agent);

impl<S> FromRequestParts<S> for AgentBearer
where
    S: Send + Sync,
    Store: FromRef<S>,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| {
            warn!("missing or malformed Authorization header");
            AuthRejection { status: StatusCode::UNAUTHORIZED, message: "missing or invalid bearer token" }
        })?;

        let store = Store::from_ref(state);
        let agent = crate::agents::authenticate_bearer(&store, token)
            .await
            .map_err(|_| AuthRejection { status: StatusCode::UNAUTHORIZED, message: "invalid bearer token" })?;

        Ok(AgentBearer(agent))
    }
}

/// Newtype wrapper so `FromRef<AppState>` for the admin token doesn't
/// collide with any other `String` the shared state carries.
#[derive(Clone)]
pub struct AdminToken(pub String);

/// Validates the bearer token against the configured admin token.
pub struct AdminBearer;

impl<S> FromRequestParts<S> for AdminBearer
where
    S: Send + Sync,
    AdminToken: FromRef<S>,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AdminToken(expected) = AdminToken::from_ref(state);
        if expected.is_empty() {
            warn!("admin_api_token is not configured — all admin requests are rejected");
            return Err(AuthRejection { status: StatusCode::FORBIDDEN, message: "server authentication not configured" });
        }

        let token = bearer_token(parts).ok_or_else(|| AuthRejection {
            status: StatusCode::FORBIDDEN,
            message: "missing or invalid authorization token",
        })?;

        if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
            warn!("invalid admin token presented");
            return Err(AuthRejection { status: StatusCode::FORBIDDEN, message: "invalid authorization token" });
        }

        Ok(AdminBearer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_identical() {
        assert!(constant_time_eq(b"hello", b"hello"));
    }

    #[test]
    fn constant_time_eq_different() {
        assert!(!constant_time_eq(b"hello", b"world"));
    }

    #[test]
    fn constant_time_eq_different_lengths() {
        assert!(!constant_time_eq(b"short", b"longer_string"));
    }

    #[test]
    fn constant_time_eq_empty() {
        assert!(constant_time_eq(b"", b""));
    }
}
