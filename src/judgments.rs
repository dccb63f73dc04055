// =============================================================================
// Judgment Submit Flow — composes the Round Service and Reason Rule Service
// =============================================================================
//
// One service function validates the payload, normalizes the embedded
// reason_rule, loads the live round, evaluates the rule against closed
// candles, and replaces the judgment row. The delete-then-insert pair runs
// inside a single transaction inside `store.replace_judgment`.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::klines::{is_whitelisted_interval, KlineFetcher};
use crate::reason_rule::{self, ReasonRule};
use crate::store::{Judgment, Store};
use crate::types::{Direction, RoundStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct ReasonRuleInput {
    pub timeframe: String,
    pub pattern: String,
    pub direction: Direction,
    pub horizon_bars: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitJudgmentRequest {
    pub round_id: String,
    pub direction: Direction,
    pub confidence: i64,
    pub comment: String,
    pub intervals: Vec<String>,
    pub analysis_start_time: i64,
    pub analysis_end_time: i64,
    pub reason_rule: ReasonRuleInput,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitJudgmentResponse {
    pub ok: bool,
    pub reason: ReasonEcho,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasonEcho {
    pub t_close_ms: i64,
    pub target_close_ms: i64,
    pub pattern_holds: bool,
}

fn validate(req: &SubmitJudgmentRequest) -> Result<(), AppError> {
    if req.round_id.trim().is_empty() {
        return Err(AppError::Validation("round_id must not be empty".into()));
    }
    if !(0..=100).contains(&req.confidence) {
        return Err(AppError::Validation("confidence must be in [0, 100]".into()));
    }
    let trimmed_comment = req.comment.trim();
    if trimmed_comment.is_empty() || trimmed_comment.chars().count() > 140 {
        return Err(AppError::Validation("comment must be 1-140 characters after trimming".into()));
    }
    if req.intervals.is_empty() {
        return Err(AppError::Validation("intervals must not be empty".into()));
    }
    if !req.intervals.iter().all(|i| is_whitelisted_interval(i)) {
        return Err(AppError::Validation("intervals contains an unsupported timeframe".into()));
    }
    if req.analysis_start_time >= req.analysis_end_time {
        return Err(AppError::Validation("analysis_start_time must precede analysis_end_time".into()));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn submit(
    store: &Store,
    fetcher: &KlineFetcher,
    coin: &str,
    agent_id: &str,
    req: SubmitJudgmentRequest,
    now_ms: i64,
    judgment_limit: usize,
    lock_window_ms: i64,
) -> Result<SubmitJudgmentResponse, AppError> {
    validate(&req)?;

    let round = store
        .get_round(&req.round_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("unknown round: {}", req.round_id)))?;
    if round.status != RoundStatus::Betting.to_string() {
        return Err(AppError::Precondition("round is not open for judgments".into()));
    }
    if now_ms >= round.start_time + lock_window_ms {
        return Err(AppError::Precondition("round is past its lock time".into()));
    }

    let rule: ReasonRule = reason_rule::normalize(
        &req.reason_rule.timeframe,
        &req.reason_rule.pattern,
        req.reason_rule.direction,
        req.reason_rule.horizon_bars,
        &req.intervals,
        Some(req.direction),
    )?;

    let evaluation = reason_rule::evaluate_at_submit(fetcher, coin, &rule, req.analysis_end_time).await?;

    let judgment = Judgment {
        id: 0,
        round_id: req.round_id.clone(),
        agent_id: agent_id.to_string(),
        direction: req.direction.to_string(),
        confidence: req.confidence,
        comment: req.comment.trim().to_string(),
        timestamp: now_ms,
        intervals: req.intervals.join(","),
        analysis_start_time: req.analysis_start_time,
        analysis_end_time: req.analysis_end_time,
        reason_timeframe: rule.timeframe.clone(),
        reason_pattern: rule.pattern.clone(),
        reason_direction: rule.direction.to_string(),
        reason_horizon_bars: rule.horizon_bars,
        reason_t_close_ms: evaluation.t_close_ms,
        reason_target_close_ms: evaluation.target_close_ms,
        reason_base_close: evaluation.base_close,
        reason_pattern_holds: Some(evaluation.pattern_holds as i64),
        reason_target_close: None,
        reason_delta_pct: None,
        reason_outcome: None,
        reason_correct: None,
        reason_evaluated_at: None,
        reason_eval_error: None,
    };

    store.replace_judgment(&judgment, judgment_limit).await?;

    Ok(SubmitJudgmentResponse {
        ok: true,
        reason: ReasonEcho {
            t_close_ms: evaluation.t_close_ms,
            target_close_ms: evaluation.target_close_ms,
            pattern_holds: evaluation.pattern_holds,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> SubmitJudgmentRequest {
        SubmitJudgmentRequest {
            round_id: "r_20260101_0000".into(),
            direction: Direction::Up,
            confidence: 75,
            comment: "breakout looks real".into(),
            intervals: vec!["1m".into()],
            analysis_start_time: 0,
            analysis_end_time: 60_000,
            reason_rule: ReasonRuleInput {
                timeframe: "1m".into(),
                pattern: "candle.doji.v1".into(),
                direction: Direction::Up,
                horizon_bars: 5,
            },
        }
    }

    #[test]
    fn validate_rejects_empty_round_id() {
        let mut req = sample_request();
        req.round_id = "".into();
        assert!(matches!(validate(&req), Err(AppError::Validation(_))));
    }

    #[test]
    fn validate_rejects_confidence_out_of_range() {
        let mut req = sample_request();
        req.confidence = 150;
        assert!(matches!(validate(&req), Err(AppError::Validation(_))));
    }

    #[test]
    fn validate_rejects_empty_comment() {
        let mut req = sample_request();
        req.comment = "   ".into();
        assert!(matches!(validate(&req), Err(AppError::Validation(_))));
    }

    #[test]
    fn validate_rejects_overlong_comment() {
        let mut req = sample_request();
        req.comment = "x".repeat(141);
        assert!(matches!(validate(&req), Err(AppError::Validation(_))));
    }

    #[test]
    fn validate_rejects_bad_interval() {
        let mut req = sample_request();
        req.intervals = vec!["2m".into()];
        assert!(matches!(validate(&req), Err(AppError::Validation(_))));
    }

    #[test]
    fn validate_rejects_backwards_window() {
        let mut req = sample_request();
        req.analysis_start_time = 60_000;
        req.analysis_end_time = 0;
        assert!(matches!(validate(&req), Err(AppError::Validation(_))));
    }

    #[test]
    fn validate_accepts_well_formed_request() {
        assert!(validate(&sample_request()).is_ok());
    }
}
