// =============================================================================
// State Advancer — the single scheduler entry point (spec.md §4.E step 1-5)
// =============================================================================
//
// `tick` is invoked by an internal interval task from `main.rs` and on-demand
// by the `/api/advance` handler; both call sites share this one function so
// the transitions it performs are never duplicated. Steps run in the fixed
// order the contract requires: refresh price, betting->locked/cancelled,
// locked->settled, maybe startRound, persist meta.
// =============================================================================

use tracing::{info, warn};

use crate::config::Config;
use crate::price_feed::PriceFeed;
use crate::rounds;
use crate::store::Store;
use crate::types::RoundStatus;

#[derive(Default)]
pub struct TickOutcome {
    pub price_refreshed: bool,
    pub round_locked: Option<String>,
    pub round_cancelled: Option<String>,
    pub round_settled: Option<String>,
    pub round_started: Option<String>,
}

/// Single entry point for the round lifecycle scheduler.
pub async fn tick(store: &Store, feed: &PriceFeed, config: &Config, now_ms: i64) -> anyhow::Result<TickOutcome> {
    let mut outcome = TickOutcome::default();
    let mut meta = store.get_meta().await?;

    // 1. Refresh price from the Live Price Feed, respecting staleness.
    let needs_refresh = match meta.last_price_at {
        None => true,
        Some(at) => now_ms - at >= config.price_refresh_ms,
    };
    if needs_refresh {
        match feed.price().await {
            Some(sample) if now_ms - sample.updated_at_ms < config.price_stale_ms => {
                meta.last_delta_pct = match meta.current_price {
                    Some(prev) if prev != 0.0 => Some((sample.price - prev) / prev * 100.0),
                    _ => meta.last_delta_pct,
                };
                meta.last_price = meta.current_price;
                meta.current_price = Some(sample.price);
                meta.last_price_at = Some(sample.updated_at_ms);
                outcome.price_refreshed = true;
            }
            Some(_) => {
                warn!("price feed sample is stale; refusing to update meta");
            }
            None => {
                warn!("price feed has no sample yet");
            }
        }
    }

    // 2/3. Load the live round and run its status transitions.
    if let Some(round) = store.get_live_round().await? {
        let lock_time = round.start_time + config.lock_window_ms();
        if round.status == RoundStatus::Betting.to_string() && now_ms >= lock_time {
            let judgment_count = store.count_judgments_for_round(&round.round_id).await?;
            if judgment_count == 0 {
                rounds::cancel_round(store, &round.round_id).await?;
                outcome.round_cancelled = Some(round.round_id.clone());
            } else {
                rounds::lock_round(store, &round.round_id).await?;
                outcome.round_locked = Some(round.round_id.clone());
            }
        } else if round.status == RoundStatus::Locked.to_string() && now_ms >= round.end_time {
            if let Some(price) = meta.current_price {
                let verdict = rounds::settle_round(
                    store,
                    &round,
                    now_ms,
                    price,
                    config.flat_threshold_pct,
                    config.verdict_limit,
                    config.score_event_limit,
                    config.feed_limit,
                )
                .await?;
                if verdict.is_some() {
                    outcome.round_settled = Some(round.round_id.clone());
                }
            } else {
                warn!(round_id = %round.round_id, "cannot settle round: no current price available");
            }
        }
    }

    // 4. If no live round remains and an active agent exists, start one.
    if store.get_live_round().await?.is_none() {
        if let Some(price) = meta.current_price {
            if let Some(round) =
                rounds::start_round(store, now_ms, price, config.round_duration_min, config.round_limit).await?
            {
                outcome.round_started = Some(round.round_id);
            }
        }
    }

    // 5. Persist meta.
    store.save_meta(&meta).await?;

    if outcome.round_locked.is_some() || outcome.round_cancelled.is_some() || outcome.round_settled.is_some() || outcome.round_started.is_some() {
        info!(
            locked = ?outcome.round_locked,
            cancelled = ?outcome.round_cancelled,
            settled = ?outcome.round_settled,
            started = ?outcome.round_started,
            "advancer tick produced round transitions"
        );
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tick_on_empty_store_is_a_noop() {
        let store = Store::open_in_memory().unwrap();
        let feed = PriceFeed::spawn("wss://example.test/ws".into(), "allMids".into(), "BTC".into());
        let config = Config::default();
        let outcome = tick(&store, &feed, &config, 0).await.unwrap();
        assert!(outcome.round_started.is_none());
    }
}
