// =============================================================================
// HTTP routing — full surface from spec.md §6
// =============================================================================
//
// Assembled with the teacher's `axum::Router` + `tower_http::cors::CorsLayer`
// construction style (`api/rest.rs`). CORS policy and any admin surface
// beyond what's listed in §6 are out of scope and not added.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{FromRef, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::agents::{self, RegisterResponse};
use crate::api::auth::{AdminToken, AgentBearer};
use crate::api::hmac_auth::SignatureWindowMs;
use crate::config::Config;
use crate::error::AppError;
use crate::judgments::{self, SubmitJudgmentRequest};
use crate::klines::KlineFetcher;
use crate::price_feed::PriceFeed;
use crate::reason_stats;
use crate::rounds;
use crate::state_advancer;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub fetcher: Arc<KlineFetcher>,
    pub feed: PriceFeed,
    pub config: Arc<Config>,
    pub claim_base_url: String,
}

impl FromRef<AppState> for Store {
    fn from_ref(state: &AppState) -> Self {
        state.store.clone()
    }
}

impl FromRef<AppState> for SignatureWindowMs {
    fn from_ref(state: &AppState) -> Self {
        SignatureWindowMs(state.config.signature_window_sec * 1000)
    }
}

impl FromRef<AppState> for AdminToken {
    fn from_ref(state: &AppState) -> Self {
        AdminToken(state.config.admin_api_token.clone())
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/summary", get(summary))
        .route("/api/advance", post(advance))
        .route("/api/klines", get(klines))
        .route("/api/reason-stats", get(reason_stats_global))
        .route("/api/agents/:id/reason-stats", get(reason_stats_agent))
        .route("/api/v1/agents/register", post(register_agent))
        .route("/claim/:token", get(claim_agent))
        .route("/api/v1/agents/status", get(agent_status))
        .route("/api/v1/agents/me", get(agent_me))
        .route("/api/v1/judgments", post(submit_judgment))
        .route("/api/diagnostics/hyperliquid", get(diagnostics))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    time: i64,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { ok: true, time: chrono::Utc::now().timestamp_millis() })
}

async fn summary(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let summary = rounds::build_summary(&state.store, now_ms).await?;
    Ok(Json(summary))
}

async fn advance(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    state_advancer::tick(&state.store, &state.feed, &state.config, now_ms).await?;
    let summary = rounds::build_summary(&state.store, now_ms).await?;
    Ok(Json(summary))
}

#[derive(Deserialize)]
struct KlinesQuery {
    #[serde(default = "default_coin")]
    coin: String,
    intervals: String,
    limit: Option<u32>,
    start_time: Option<i64>,
    end_time: Option<i64>,
}

fn default_coin() -> String {
    "BTC".to_string()
}

async fn klines(State(state): State<AppState>, Query(q): Query<KlinesQuery>) -> Result<impl IntoResponse, AppError> {
    let intervals: Vec<String> = q.intervals.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
    if intervals.is_empty() {
        return Err(AppError::Validation("intervals must not be empty".into()));
    }
    let resp = state.fetcher.fetch(&q.coin, &intervals, q.limit, q.start_time, q.end_time).await?;
    Ok(Json(resp))
}

#[derive(Deserialize)]
struct ReasonStatsQuery {
    since: Option<i64>,
    until: Option<i64>,
    limit: Option<usize>,
}

async fn reason_stats_global(
    State(state): State<AppState>,
    Query(q): Query<ReasonStatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let stats = reason_stats::global_stats(&state.store, q.since, q.until, q.limit, now_ms).await?;
    Ok(Json(stats))
}

async fn reason_stats_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(q): Query<ReasonStatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let stats = reason_stats::agent_stats(&state.store, &agent_id, q.since, q.until, q.limit, now_ms).await?;
    Ok(Json(stats))
}

#[derive(Deserialize)]
struct RegisterRequest {
    name: String,
    description: Option<String>,
}

async fn register_agent(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    let resp = agents::register(&state.store, &req.name, req.description, None, &state.claim_base_url).await?;
    Ok(Json(resp))
}

async fn claim_agent(State(state): State<AppState>, Path(token): Path<String>) -> Result<impl IntoResponse, AppError> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let agent = agents::claim(&state.store, &token, now_ms).await?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "id": agent.id,
        "status": agent.status,
        "claimed_at": agent.claimed_at,
    })))
}

async fn agent_status(AgentBearer(agent): AgentBearer) -> impl IntoResponse {
    Json(serde_json::json!({ "id": agent.id, "status": agent.status, "score": agent.score }))
}

async fn agent_me(AgentBearer(agent): AgentBearer) -> impl IntoResponse {
    Json(serde_json::json!({
        "id": agent.id,
        "name": agent.name,
        "persona": agent.persona,
        "prompt": agent.prompt,
        "score": agent.score,
        "status": agent.status,
        "claimed_at": agent.claimed_at,
    }))
}

async fn submit_judgment(
    State(state): State<AppState>,
    AgentBearer(agent): AgentBearer,
    Json(req): Json<SubmitJudgmentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let resp = judgments::submit(
        &state.store,
        &state.fetcher,
        &state.config.coin,
        &agent.id,
        req,
        now_ms,
        state.config.judgment_limit,
        state.config.lock_window_ms(),
    )
    .await?;
    Ok(Json(resp))
}

/// Feed diagnostics snapshot. "Persisting" the snapshot means logging it at
/// info level for operational audit trails, rather than adding a dedicated
/// table for a debug-only surface.
async fn diagnostics(State(state): State<AppState>) -> impl IntoResponse {
    let diag = state.feed.diag().await;
    if let Some(d) = &diag {
        tracing::info!(
            state = d.state,
            last_error = ?d.last_error,
            last_event_at_ms = ?d.last_event_at_ms,
            last_update_at_ms = ?d.last_update_at_ms,
            "hyperliquid feed diagnostics snapshot"
        );
    }
    Json(diag)
}
