// =============================================================================
// Agent registration & claim
// =============================================================================
//
// Implements the register/claim/status/me interface from spec.md §6, plus
// the identifier-generation rules: 64-hex `api_key`, 32-hex `claim_token`,
// 6-digit `verification_code`, and `id = slugify(name)`. Grounded in the
// teacher's `Uuid::new_v4()` ID-generation idiom, generalized to the `rand`
// crate for secret material since these identifiers double as bearer
// credentials rather than opaque row keys.
// =============================================================================

use rand::RngCore;
use serde::Serialize;

use crate::error::AppError;
use crate::store::{Agent, Store};
use crate::types::AgentStatus;

#[derive(Debug, Clone, Serialize)]
pub struct RegisterResponse {
    pub ok: bool,
    pub id: String,
    pub name: String,
    pub status: String,
    pub api_key: String,
    pub claim_url: String,
    pub verification_code: String,
}

pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = false;
    for ch in name.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    out.trim_matches('_').to_string()
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

fn random_verification_code() -> String {
    let mut buf = [0u8; 4];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    let n = u32::from_be_bytes(buf) % 1_000_000;
    format!("{n:06}")
}

pub async fn register(
    store: &Store,
    name: &str,
    persona: Option<String>,
    prompt: Option<String>,
    claim_base_url: &str,
) -> Result<RegisterResponse, AppError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("name must not be empty".into()));
    }
    let id = slugify(trimmed);
    if id.is_empty() {
        return Err(AppError::Validation("name did not produce a valid identifier".into()));
    }
    if store.get_agent_by_id(&id).await?.is_some() {
        return Err(AppError::Conflict(format!("agent id already registered: {id}")));
    }

    let api_key = random_hex(32);
    let claim_token = random_hex(16);
    let verification_code = random_verification_code();

    let agent = Agent {
        id: id.clone(),
        name: trimmed.to_string(),
        persona: persona.unwrap_or_default(),
        prompt: prompt.unwrap_or_default(),
        score: 0,
        status: AgentStatus::PendingClaim.to_string(),
        secret: api_key.clone(),
        claim_token: claim_token.clone(),
        verification_code: verification_code.clone(),
        claimed_at: None,
    };
    store.insert_agent(&agent).await?;

    Ok(RegisterResponse {
        ok: true,
        id,
        name: trimmed.to_string(),
        status: AgentStatus::PendingClaim.to_string(),
        api_key,
        claim_url: format!("{claim_base_url}/claim/{claim_token}"),
        verification_code,
    })
}

/// Idempotent: activating an already-active agent simply returns it.
pub async fn claim(store: &Store, token: &str, now_ms: i64) -> Result<Agent, AppError> {
    let agent = store
        .get_agent_by_claim_token(token)
        .await?
        .ok_or_else(|| AppError::NotFound("unknown claim token".into()))?;

    if agent.status != AgentStatus::Active.to_string() {
        store.mark_agent_claimed(&agent.id, now_ms).await?;
        return Ok(store.get_agent_by_id(&agent.id).await?.expect("agent just claimed"));
    }
    Ok(agent)
}

pub async fn authenticate_bearer(store: &Store, token: &str) -> Result<Agent, AppError> {
    let agent = store
        .get_agent_by_secret(token)
        .await?
        .ok_or_else(|| AppError::Auth("invalid bearer token".into()))?;
    if agent.status != AgentStatus::Active.to_string() {
        return Err(AppError::Auth("agent is not active".into()));
    }
    Ok(agent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_non_alphanumerics() {
        assert_eq!(slugify("Trading Bot #42!"), "trading_bot_42");
        assert_eq!(slugify("  leading and trailing  "), "leading_and_trailing");
        assert_eq!(slugify("Already_Slug"), "already_slug");
    }

    #[test]
    fn random_hex_produces_expected_length() {
        assert_eq!(random_hex(32).len(), 64);
        assert_eq!(random_hex(16).len(), 32);
    }

    #[test]
    fn verification_code_is_six_digits() {
        let code = random_verification_code();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn register_then_claim_then_authenticate() {
        let store = Store::open_in_memory().unwrap();
        let resp = register(&store, "Test Agent", None, None, "https://example.test").await.unwrap();
        assert_eq!(resp.id, "test_agent");
        assert_eq!(resp.verification_code.len(), 6);

        let token = resp.claim_url.rsplit('/').next().unwrap().to_string();
        let claimed = claim(&store, &token, 1000).await.unwrap();
        assert_eq!(claimed.status, "active");

        let auth = authenticate_bearer(&store, &resp.api_key).await.unwrap();
        assert_eq!(auth.id, "test_agent");
    }

    #[tokio::test]
    async fn duplicate_register_conflicts() {
        let store = Store::open_in_memory().unwrap();
        register(&store, "Dup", None, None, "https://example.test").await.unwrap();
        let err = register(&store, "Dup", None, None, "https://example.test").await;
        assert!(matches!(err, Err(AppError::Conflict(_))));
    }
}
