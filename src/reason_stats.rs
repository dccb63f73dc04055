// =============================================================================
// Reason Stats — aggregate ReasonRule accuracy over a time window
// =============================================================================
//
// Thin wrapper over `Store::reason_stats`/`reason_stats_breakdown`: plain SQL
// aggregation (AVG/COUNT/GROUP BY) issued through the store, row-capped per
// the defaults below.
// =============================================================================

use serde::Serialize;

use crate::error::AppError;
use crate::store::{ReasonStatsGroup, ReasonStatsRow, Store};

const DEFAULT_WINDOW_MS: i64 = 30 * 24 * 60 * 60 * 1000;
const DEFAULT_LIMIT: usize = 5000;
const MAX_LIMIT: usize = 20_000;

#[derive(Debug, Clone, Serialize)]
pub struct ReasonStatsResponse {
    #[serde(flatten)]
    pub totals: ReasonStatsRow,
    pub by_timeframe: Vec<ReasonStatsGroup>,
    pub by_pattern: Vec<ReasonStatsGroup>,
}

/// Clamps an optional row cap to `[1, MAX_LIMIT]`, defaulting to `DEFAULT_LIMIT`.
pub fn normalize_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// Defaults `since` to `until - 30 days` when absent.
pub fn normalize_window(since_ms: Option<i64>, until_ms: Option<i64>, now_ms: i64) -> (i64, i64) {
    let until = until_ms.unwrap_or(now_ms);
    let since = since_ms.unwrap_or(until - DEFAULT_WINDOW_MS);
    (since, until)
}

pub async fn global_stats(
    store: &Store,
    since_ms: Option<i64>,
    until_ms: Option<i64>,
    limit: Option<usize>,
    now_ms: i64,
) -> Result<ReasonStatsResponse, AppError> {
    compute(store, since_ms, until_ms, limit, now_ms, None).await
}

pub async fn agent_stats(
    store: &Store,
    agent_id: &str,
    since_ms: Option<i64>,
    until_ms: Option<i64>,
    limit: Option<usize>,
    now_ms: i64,
) -> Result<ReasonStatsResponse, AppError> {
    store
        .get_agent_by_id(agent_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("unknown agent: {agent_id}")))?;
    compute(store, since_ms, until_ms, limit, now_ms, Some(agent_id)).await
}

async fn compute(
    store: &Store,
    since_ms: Option<i64>,
    until_ms: Option<i64>,
    limit: Option<usize>,
    now_ms: i64,
    agent_id: Option<&str>,
) -> Result<ReasonStatsResponse, AppError> {
    let (since, until) = normalize_window(since_ms, until_ms, now_ms);
    let limit = normalize_limit(limit);

    let totals = store.reason_stats(since, until, limit, agent_id).await?;
    let by_timeframe = store.reason_stats_breakdown("reason_timeframe", since, until, limit, agent_id).await?;
    let by_pattern = store.reason_stats_breakdown("reason_pattern", since, until, limit, agent_id).await?;

    Ok(ReasonStatsResponse { totals, by_timeframe, by_pattern })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_limit_defaults_and_clamps() {
        assert_eq!(normalize_limit(None), DEFAULT_LIMIT);
        assert_eq!(normalize_limit(Some(0)), 1);
        assert_eq!(normalize_limit(Some(999_999)), MAX_LIMIT);
        assert_eq!(normalize_limit(Some(100)), 100);
    }

    #[test]
    fn normalize_window_defaults_since_to_30_days_before_until() {
        let (since, until) = normalize_window(None, Some(1_000_000_000_000), 1_000_000_000_000);
        assert_eq!(until, 1_000_000_000_000);
        assert_eq!(since, until - DEFAULT_WINDOW_MS);
    }

    #[test]
    fn normalize_window_uses_now_when_until_absent() {
        let (since, until) = normalize_window(None, None, 5_000_000);
        assert_eq!(until, 5_000_000);
        assert_eq!(since, 5_000_000 - DEFAULT_WINDOW_MS);
    }

    #[tokio::test]
    async fn agent_stats_404s_for_unknown_agent() {
        let store = Store::open_in_memory().unwrap();
        let err = agent_stats(&store, "nope", None, None, None, 0).await;
        assert!(matches!(err, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn global_stats_on_empty_store_returns_zero_totals() {
        let store = Store::open_in_memory().unwrap();
        let resp = global_stats(&store, None, None, None, 1_000_000).await.unwrap();
        assert_eq!(resp.totals.total_evaluated, 0);
        assert!(resp.by_timeframe.is_empty());
    }
}
