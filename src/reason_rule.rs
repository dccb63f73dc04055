// =============================================================================
// Reason Rule Service — validation, alignment, at-submit/at-horizon evaluation
// =============================================================================
//
// `ReasonRule` normalization returns a structured `AppError::Validation`.
// Alignment arithmetic is pure integer math. `evaluate_at_submit` and
// `sweep_pending` call the Kline Fetcher and the row store respectively,
// following the teacher's `anyhow::Context`-heavy error style.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AppError;
use crate::klines::{interval_to_ms, is_whitelisted_interval, KlineFetcher};
use crate::patterns::{self, Bar};
use crate::store::Store;
use crate::types::Direction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonRule {
    pub timeframe: String,
    pub pattern: String,
    pub direction: Direction,
    pub horizon_bars: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitEvaluation {
    pub t_close_ms: i64,
    pub target_close_ms: i64,
    pub base_close: f64,
    pub pattern_holds: bool,
}

/// Validates a raw rule payload into a canonical `ReasonRule`.
pub fn normalize(
    timeframe: &str,
    pattern: &str,
    direction: Direction,
    horizon_bars: i64,
    allowed_intervals: &[String],
    expected_direction: Option<Direction>,
) -> Result<ReasonRule, AppError> {
    if !is_whitelisted_interval(timeframe) {
        return Err(AppError::Validation(format!("unsupported timeframe: {timeframe}")));
    }
    if !allowed_intervals.is_empty() && !allowed_intervals.iter().any(|i| i == timeframe) {
        return Err(AppError::Validation(format!("timeframe {timeframe} not in allowed intervals")));
    }
    if !patterns::is_known_pattern(pattern) {
        return Err(AppError::Validation(format!("unknown pattern: {pattern}")));
    }
    if let Some(expected) = expected_direction {
        if expected != direction {
            return Err(AppError::Validation("reason_rule direction must match judgment direction".into()));
        }
    }
    if !(1..=200).contains(&horizon_bars) {
        return Err(AppError::Validation("horizon_bars must be in [1, 200]".into()));
    }

    Ok(ReasonRule { timeframe: timeframe.to_string(), pattern: pattern.to_string(), direction, horizon_bars })
}

/// `aligned = floor(ms / intervalMs) * intervalMs - 1`.
pub fn align_close_ms(analysis_end_time_ms: i64, timeframe: &str) -> Result<i64, AppError> {
    let interval_ms = interval_to_ms(timeframe)
        .ok_or_else(|| AppError::Validation(format!("unsupported timeframe: {timeframe}")))?;
    Ok((analysis_end_time_ms / interval_ms) * interval_ms - 1)
}

pub fn target_close_ms(aligned_close_ms: i64, horizon_bars: i64, timeframe: &str) -> Result<i64, AppError> {
    let interval_ms = interval_to_ms(timeframe)
        .ok_or_else(|| AppError::Validation(format!("unsupported timeframe: {timeframe}")))?;
    Ok(aligned_close_ms + horizon_bars * interval_ms)
}

/// `deltaPct = (targetClose - baseClose)/baseClose * 100`; FLAT iff
/// `|deltaPct| < flat_threshold_pct`.
pub fn compute_outcome(base_close: f64, target_close: f64, flat_threshold_pct: f64) -> (f64, Direction) {
    let delta_pct = (target_close - base_close) / base_close * 100.0;
    (delta_pct, Direction::from_delta_pct(delta_pct, flat_threshold_pct))
}

pub async fn evaluate_at_submit(
    fetcher: &KlineFetcher,
    coin: &str,
    rule: &ReasonRule,
    analysis_end_time_ms: i64,
) -> Result<SubmitEvaluation, AppError> {
    let aligned = align_close_ms(analysis_end_time_ms, &rule.timeframe)?;
    let target = target_close_ms(aligned, rule.horizon_bars, &rule.timeframe)?;
    let required = patterns::required_bars(&rule.pattern)
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let resp = fetcher
        .fetch(coin, &[rule.timeframe.clone()], Some(required as u32 + 2), None, Some(aligned))
        .await?;
    let klines = resp
        .intervals
        .get(&rule.timeframe)
        .ok_or_else(|| AppError::Upstream(format!("no kline data for {}", rule.timeframe)))?;

    if klines.len() < required {
        return Err(AppError::Precondition("insufficient candle history for pattern".into()));
    }

    let aligned_idx = klines
        .iter()
        .position(|k| k.close_time == aligned)
        .ok_or_else(|| AppError::Precondition("analysis_end_time does not align to any closed candle".into()))?;

    if aligned_idx + 1 < required {
        return Err(AppError::Precondition("insufficient candle history for pattern".into()));
    }

    let window: Vec<Bar> = klines[aligned_idx + 1 - required..=aligned_idx].iter().map(|k| k.as_bar()).collect();
    let base_close = klines[aligned_idx].close;
    let pattern_holds = patterns::evaluate(&rule.pattern, &window).map_err(|e| AppError::Validation(e.to_string()))?;

    Ok(SubmitEvaluation { t_close_ms: aligned, target_close_ms: target, base_close, pattern_holds })
}

/// Scans for judgments whose horizon has reached and evaluates their
/// outcome. Errors for a single row are captured into `reason_eval_error`
/// and never abort the sweep.
pub async fn sweep_pending(
    store: &Store,
    fetcher: &KlineFetcher,
    coin: &str,
    now_ms: i64,
    max_rows: usize,
    flat_threshold_pct: f64,
) -> anyhow::Result<usize> {
    let pending = store.list_pending_reason_sweep(now_ms, max_rows).await?;
    let mut evaluated = 0;

    for judgment in pending {
        match evaluate_one(fetcher, coin, &judgment, flat_threshold_pct).await {
            Ok(Some((delta_pct, outcome, target_close, correct))) => {
                store
                    .update_reason_evaluation(
                        judgment.id,
                        Some(target_close),
                        Some(delta_pct),
                        Some(outcome.as_str()),
                        Some(correct),
                        now_ms,
                        None,
                    )
                    .await?;
                evaluated += 1;
            }
            Ok(None) => {
                // Matching candle not yet available; retry on next sweep.
            }
            Err(e) => {
                warn!(judgment_id = judgment.id, error = %e, "reason sweep evaluation failed");
                store
                    .update_reason_evaluation(judgment.id, None, None, None, None, now_ms, Some(&e.to_string()))
                    .await?;
            }
        }
    }
    Ok(evaluated)
}

async fn evaluate_one(
    fetcher: &KlineFetcher,
    coin: &str,
    judgment: &crate::store::Judgment,
    flat_threshold_pct: f64,
) -> anyhow::Result<Option<(f64, Direction, f64, bool)>> {
    let resp = fetcher
        .fetch(coin, &[judgment.reason_timeframe.clone()], Some(5), None, Some(judgment.reason_target_close_ms))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let klines = resp.intervals.get(&judgment.reason_timeframe);
    let target_kline = match klines.and_then(|ks| ks.iter().find(|k| k.close_time == judgment.reason_target_close_ms)) {
        Some(k) => k,
        None => return Ok(None),
    };

    let (delta_pct, outcome) = compute_outcome(judgment.reason_base_close, target_kline.close, flat_threshold_pct);
    let rounded_delta = (delta_pct * 1_000_000.0).round() / 1_000_000.0;
    let predicted: Direction = judgment
        .reason_direction
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid stored direction: {}", judgment.reason_direction))?;
    let correct = predicted == outcome;

    Ok(Some((rounded_delta, outcome, target_kline.close, correct)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_close_matches_literal_example() {
        // analysis_end_time = 2026-02-04T00:01:30Z, timeframe=1m
        // -> aligned close = 2026-02-04T00:00:59.999Z
        let ms = chrono::DateTime::parse_from_rfc3339("2026-02-04T00:01:30Z").unwrap().timestamp_millis();
        let aligned = align_close_ms(ms, "1m").unwrap();
        let expected = chrono::DateTime::parse_from_rfc3339("2026-02-04T00:00:59.999Z").unwrap().timestamp_millis();
        assert_eq!(aligned, expected);
    }

    #[test]
    fn aligned_close_is_one_ms_before_boundary() {
        let ms = 1_700_000_123_456i64;
        let aligned = align_close_ms(ms, "1m").unwrap();
        assert_eq!((aligned + 1) % 60_000, 0);
    }

    #[test]
    fn flat_outcome_literal_example() {
        let (delta, outcome) = compute_outcome(100.0, 100.1, 0.2);
        assert!((delta - 0.1).abs() < 1e-9);
        assert_eq!(outcome, Direction::Flat);
    }

    #[test]
    fn normalize_rejects_unknown_pattern() {
        let err = normalize("1m", "not.a.pattern", Direction::Up, 5, &[], None);
        assert!(matches!(err, Err(AppError::Validation(_))));
    }

    #[test]
    fn normalize_rejects_direction_mismatch() {
        let err = normalize(
            "1m",
            "candle.doji.v1",
            Direction::Up,
            5,
            &[],
            Some(Direction::Down),
        );
        assert!(matches!(err, Err(AppError::Validation(_))));
    }

    #[test]
    fn normalize_rejects_horizon_out_of_range() {
        let err = normalize("1m", "candle.doji.v1", Direction::Up, 500, &[], None);
        assert!(matches!(err, Err(AppError::Validation(_))));
    }

    #[test]
    fn normalize_accepts_valid_rule() {
        let rule = normalize("1m", "candle.doji.v1", Direction::Up, 5, &["1m".to_string()], Some(Direction::Up)).unwrap();
        assert_eq!(rule.horizon_bars, 5);
    }
}
