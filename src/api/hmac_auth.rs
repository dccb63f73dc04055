// =============================================================================
// HMAC/MCP Authentication — Axum extractor
// =============================================================================
//
// Validates `X-Agent-Id` / `X-Ts` / `X-Signature` headers against the
// canonical string `ts + "\n" + METHOD + "\n" + path + "\n" + body`, signed
// with the agent's secret via HMAC-SHA256. Builds directly on the teacher's
// `hmac`/`sha2`/`hex` dependencies and its constant-time comparison helper in
// `api/auth.rs`, generalized into a second extractor.
// =============================================================================

use axum::{
    body::{to_bytes, Body},
    extract::{FromRef, FromRequest},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use crate::api::auth::constant_time_eq;
use crate::store::{Agent, Store};
use crate::types::AgentStatus;

type HmacSha256 = Hmac<Sha256>;

/// Newtype wrapper so `FromRef<AppState>` for the signature window doesn't
/// collide with any other `i64` the shared state carries.
#[derive(Clone, Copy)]
pub struct SignatureWindowMs(pub i64);

pub struct HmacAuthed {
    pub agent: Agent,
    pub body: axum::body::Bytes,
}

pub struct HmacRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for HmacRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, axum::Json(body)).into_response()
    }
}

fn reject(status: StatusCode, message: &'static str) -> HmacRejection {
    HmacRejection { status, message }
}

impl<S> FromRequest<S> for HmacAuthed
where
    S: Send + Sync,
    Store: FromRef<S>,
    SignatureWindowMs: FromRef<S>,
{
    type Rejection = HmacRejection;

    async fn from_request(req: Request<Body>, state: &S) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();

        let agent_id = parts
            .headers
            .get("X-Agent-Id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "missing X-Agent-Id header"))?
            .to_string();
        let ts_header = parts
            .headers
            .get("X-Ts")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "missing X-Ts header"))?;
        let ts: i64 = ts_header.parse().map_err(|_| reject(StatusCode::UNAUTHORIZED, "malformed X-Ts header"))?;
        let signature_hex = parts
            .headers
            .get("X-Signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "missing X-Signature header"))?
            .to_string();

        let now_ms = chrono::Utc::now().timestamp_millis();
        let SignatureWindowMs(window_ms) = SignatureWindowMs::from_ref(state);
        if (now_ms - ts).abs() > window_ms {
            warn!(agent_id = %agent_id, "HMAC signature timestamp outside allowed window");
            return Err(reject(StatusCode::UNAUTHORIZED, "stale signature timestamp"));
        }

        let store = Store::from_ref(state);
        let agent = store
            .get_agent_by_id(&agent_id)
            .await
            .map_err(|_| reject(StatusCode::INTERNAL_SERVER_ERROR, "store lookup failed"))?
            .filter(|a| a.status == AgentStatus::Active.to_string())
            .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "unknown or inactive agent"))?;

        let body_bytes = to_bytes(body, usize::MAX)
            .await
            .map_err(|_| reject(StatusCode::BAD_REQUEST, "failed to read request body"))?;

        let canonical = format!(
            "{}\n{}\n{}\n{}",
            ts,
            parts.method.as_str(),
            parts.uri.path(),
            std::str::from_utf8(&body_bytes).unwrap_or("")
        );

        let mut mac = HmacSha256::new_from_slice(agent.secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(canonical.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        if !constant_time_eq(expected.as_bytes(), signature_hex.to_lowercase().as_bytes()) {
            warn!(agent_id = %agent_id, "HMAC signature mismatch");
            return Err(reject(StatusCode::UNAUTHORIZED, "invalid signature"));
        }

        Ok(HmacAuthed { agent, body: body_bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_matches_expected_digest_for_known_key() {
        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(b"1000\nPOST\n/api/v1/judgments\n{}");
        let digest = hex::encode(mac.finalize().into_bytes());
        assert_eq!(digest.len(), 64);
    }
}
