// =============================================================================
// Round Service — lifecycle state machine, verdicts, scoring, summaries
// =============================================================================
//
// New domain logic grounded in the teacher's `position_engine.rs::PositionManager`
// shape: an owning manager over a row store instead of in-memory `Vec`s,
// `open`/`closed` separation replaced by `betting`/`locked`/`settled` status
// filtering via SQL. Scoring is ported verbatim from spec.md with no
// embellishment.
// =============================================================================

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::error::AppError;
use crate::store::{Agent, FlipCard, Judgment, Round, ScoreEvent, Store, Verdict};
use crate::types::{AgentStatus, Direction, FlipResult, RoundStatus};

pub fn round_id_for(now_ms: i64) -> String {
    let dt = chrono::DateTime::<Utc>::from_timestamp_millis(now_ms).unwrap_or_else(Utc::now);
    format!("r_{}", dt.format("%Y%m%d_%H%M"))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// No-op if a non-settled round already exists. Requires at least one
/// active agent with a non-empty secret.
pub async fn start_round(
    store: &Store,
    now_ms: i64,
    current_price: f64,
    duration_min: i64,
    round_limit: usize,
) -> anyhow::Result<Option<Round>> {
    if store.get_live_round().await?.is_some() {
        return Ok(None);
    }

    let active = store.list_active_agents().await?;
    if !active.iter().any(|a| !a.secret.is_empty()) {
        return Ok(None);
    }

    let round = Round {
        round_id: round_id_for(now_ms),
        symbol: "BTCUSDT".to_string(),
        duration_min,
        start_price: round2(current_price),
        end_price: None,
        status: RoundStatus::Betting.to_string(),
        start_time: now_ms,
        end_time: now_ms + duration_min * 60_000,
    };
    store.insert_round(&round, round_limit).await?;
    info!(round_id = %round.round_id, start_price = round.start_price, "round started");
    Ok(Some(round))
}

pub async fn lock_round(store: &Store, round_id: &str) -> anyhow::Result<()> {
    store.lock_round(round_id).await?;
    info!(round_id, "round locked");
    Ok(())
}

pub async fn cancel_round(store: &Store, round_id: &str) -> anyhow::Result<()> {
    store.cancel_round(round_id).await?;
    info!(round_id, "round cancelled (no submissions)");
    Ok(())
}

/// Idempotent: returns immediately if the round is already settled. All
/// writes (verdict, score events, flip cards, agent scores) execute as a
/// single atomic batch.
pub async fn settle_round(
    store: &Store,
    round: &Round,
    now_ms: i64,
    current_price: f64,
    flat_threshold_pct: f64,
    verdict_limit: usize,
    score_event_limit: usize,
    feed_limit: usize,
) -> anyhow::Result<Option<Verdict>> {
    if round.status == RoundStatus::Settled.to_string() {
        return Ok(None);
    }

    let end_price = round2(current_price);
    let delta_pct = ((end_price - round.start_price) / round.start_price * 100.0 * 10.0).round() / 10.0;
    let result = Direction::from_delta_pct(delta_pct, flat_threshold_pct);

    let verdict = Verdict { round_id: round.round_id.clone(), result: result.to_string(), delta_pct, timestamp: now_ms };

    let judgments = store.list_judgments_for_round(&round.round_id).await?;
    let mut score_events = Vec::with_capacity(judgments.len());
    let mut flip_cards = Vec::with_capacity(judgments.len());

    for j in &judgments {
        let predicted: Direction = j.direction.parse().unwrap_or(Direction::Flat);
        let correct = predicted == result;
        let score_change = if correct { j.confidence } else { -((j.confidence as f64 * 1.5).round() as i64) };
        let reason = if correct { "Correct" } else { "High confidence failure" };

        score_events.push(ScoreEvent {
            id: 0,
            agent_id: j.agent_id.clone(),
            round_id: round.round_id.clone(),
            correct,
            confidence: j.confidence,
            score_change,
            reason: reason.to_string(),
            timestamp: now_ms,
        });

        let flip_result = if correct { FlipResult::Win } else { FlipResult::Fail };
        let agent_name = store.get_agent_by_id(&j.agent_id).await?.map(|a| a.name).unwrap_or_else(|| j.agent_id.clone());
        let (title, text) = flip_card_copy(flip_result, &agent_name, j.confidence, score_change, &round.round_id);

        flip_cards.push(FlipCard {
            id: 0,
            round_id: round.round_id.clone(),
            agent_id: j.agent_id.clone(),
            result: flip_result.to_string(),
            title,
            text,
            agent_name,
            confidence: j.confidence,
            score_change,
            timestamp: now_ms,
        });
    }

    store
        .settle_round_atomic(
            &round.round_id,
            end_price,
            &verdict,
            &score_events,
            &flip_cards,
            verdict_limit,
            score_event_limit,
            feed_limit,
        )
        .await?;

    info!(round_id = %round.round_id, result = %result, delta_pct, "round settled");
    Ok(Some(verdict))
}

fn flip_card_copy(result: FlipResult, agent_name: &str, confidence: i64, score_change: i64, round_id: &str) -> (String, String) {
    match result {
        FlipResult::Win => (
            format!("{agent_name} called it"),
            format!("{agent_name} predicted correctly at {confidence}% confidence (+{score_change}) on {round_id}."),
        ),
        FlipResult::Fail => (
            format!("{agent_name} missed"),
            format!("{agent_name} was wrong at {confidence}% confidence ({score_change}) on {round_id}."),
        ),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    #[serde(flatten)]
    pub agent: AgentPublic,
    pub recent_rounds: i64,
    pub recent_high_conf_failures: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentPublic {
    pub id: String,
    pub name: String,
    pub score: i64,
    pub status: String,
}

impl From<&Agent> for AgentPublic {
    fn from(a: &Agent) -> Self {
        Self { id: a.id.clone(), name: a.name.clone(), score: a.score, status: a.status.clone() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub server_time: i64,
    pub live_round: Option<Round>,
    pub live_judgments: Vec<Judgment>,
    pub countdown_ms: Option<i64>,
    pub last_verdict: Option<Verdict>,
    pub highlight: Option<FlipCard>,
    pub agents: Vec<AgentSummary>,
    pub feed: Vec<FlipCard>,
}

const FEED_SIZE: usize = 30;
const RECENT_ROUNDS_WINDOW: usize = 5;

/// Returns (server_time, live round with judgments and countdown, last
/// verdict, highlight, ranked agents, feed of up to 30 flip cards).
pub async fn build_summary(store: &Store, now_ms: i64) -> Result<Summary, AppError> {
    let live_round = store.get_live_round().await?;
    let live_judgments = match &live_round {
        Some(r) => store.list_judgments_for_round(&r.round_id).await?,
        None => Vec::new(),
    };
    let countdown_ms = live_round.as_ref().map(|r| (r.end_time - now_ms).max(0));

    let last_verdict = store.get_last_verdict().await?;
    let highlight = match &last_verdict {
        Some(v) => {
            let top = live_judgments_for_round_highlight(store, &v.round_id).await?;
            match top {
                Some(agent_id) => store.get_flip_card(&v.round_id, &agent_id).await?,
                None => None,
            }
        }
        None => None,
    };

    let agents_raw = store.list_agents_by_score_desc().await?;
    let mut agents = Vec::with_capacity(agents_raw.len());
    for a in &agents_raw {
        let recent_rounds = store.count_rounds_for_agent(&a.id, RECENT_ROUNDS_WINDOW).await?;
        let recent_events = store.list_recent_score_events_for_agent(&a.id, RECENT_ROUNDS_WINDOW).await?;
        let recent_high_conf_failures =
            recent_events.iter().filter(|e| !e.correct && e.confidence >= 80).count() as i64;
        agents.push(AgentSummary {
            agent: AgentPublic::from(a),
            recent_rounds,
            recent_high_conf_failures,
        });
    }

    let fail_feed = store.list_recent_high_conf_failure_cards(FEED_SIZE).await?;
    let feed = if fail_feed.is_empty() { store.list_recent_flip_cards(FEED_SIZE).await? } else { fail_feed };

    Ok(Summary {
        server_time: now_ms,
        live_round,
        live_judgments,
        countdown_ms,
        last_verdict,
        highlight,
        agents,
        feed,
    })
}

/// The agent_id of the top-confidence judgment for a settled round, used to
/// reconstruct the summary's `highlight` from the persisted flip card.
async fn live_judgments_for_round_highlight(store: &Store, round_id: &str) -> Result<Option<String>, AppError> {
    let judgments = store.list_judgments_for_round(round_id).await?;
    Ok(judgments.into_iter().max_by_key(|j| j.confidence).map(|j| j.agent_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_agent(id: &str) -> Agent {
        Agent {
            id: id.to_string(),
            name: id.to_string(),
            persona: String::new(),
            prompt: String::new(),
            score: 0,
            status: AgentStatus::Active.to_string(),
            secret: "s".to_string(),
            claim_token: "t".to_string(),
            verification_code: "123456".to_string(),
            claimed_at: Some(0),
        }
    }

    #[test]
    fn round_id_format_matches_spec() {
        let ms = chrono::DateTime::parse_from_rfc3339("2026-02-04T00:01:30Z").unwrap().timestamp_millis();
        assert_eq!(round_id_for(ms), "r_20260204_0001");
    }

    #[tokio::test]
    async fn start_round_noop_without_active_agents() {
        let store = Store::open_in_memory().unwrap();
        let r = start_round(&store, 0, 100.0, 30, 200).await.unwrap();
        assert!(r.is_none());
    }

    #[tokio::test]
    async fn start_round_creates_when_agent_active() {
        let store = Store::open_in_memory().unwrap();
        store.insert_agent(&sample_agent("a1")).await.unwrap();
        let r = start_round(&store, 0, 100.0, 30, 200).await.unwrap().unwrap();
        assert_eq!(r.start_price, 100.0);
        assert_eq!(r.status, "betting");

        // second call is a no-op since a live round exists
        let r2 = start_round(&store, 1000, 100.0, 30, 200).await.unwrap();
        assert!(r2.is_none());
    }

    #[tokio::test]
    async fn settle_round_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.insert_agent(&sample_agent("a1")).await.unwrap();
        let round = start_round(&store, 0, 100.0, 30, 200).await.unwrap().unwrap();
        let v1 = settle_round(&store, &round, 1_800_000, 105.0, 0.2, 200, 1000, 200).await.unwrap();
        assert!(v1.is_some());

        let settled = store.get_round(&round.round_id).await.unwrap().unwrap();
        let v2 = settle_round(&store, &settled, 1_800_000, 105.0, 0.2, 200, 1000, 200).await.unwrap();
        assert!(v2.is_none());
    }
}
