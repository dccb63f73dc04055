// =============================================================================
// Pattern Evaluator — pure, deterministic (pattern_id, bars) -> bool
// =============================================================================
//
// A closed registry of pattern IDs is the single source of truth for both
// `evaluate` and `required_bars`; nothing outside this module invents a
// pattern name. Every pattern function takes an ordered OHLC bar slice
// (oldest first) and answers whether the pattern holds at the *last* bar.
// =============================================================================

pub mod candles;
pub mod ema;
pub mod pivots;
pub mod rsi;
pub mod structure;
pub mod trend;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("unknown pattern id: {0}")]
    UnknownPattern(String),
}

type EvalFn = fn(&[Bar]) -> bool;

struct PatternEntry {
    id: &'static str,
    required_bars: usize,
    eval: EvalFn,
}

const PATTERNS: &[PatternEntry] = &[
    PatternEntry { id: "candle.bullish_engulfing.v1", required_bars: 2, eval: candles::bullish_engulfing },
    PatternEntry { id: "candle.bearish_engulfing.v1", required_bars: 2, eval: candles::bearish_engulfing },
    PatternEntry { id: "candle.hammer.v1", required_bars: 1, eval: candles::hammer },
    PatternEntry { id: "candle.shooting_star.v1", required_bars: 1, eval: candles::shooting_star },
    PatternEntry { id: "candle.doji.v1", required_bars: 1, eval: candles::doji },
    PatternEntry { id: "candle.inside_bar.v1", required_bars: 2, eval: candles::inside_bar },
    PatternEntry { id: "candle.outside_bar.v1", required_bars: 2, eval: candles::outside_bar },
    PatternEntry { id: "candle.morning_star.v1", required_bars: 3, eval: candles::morning_star },
    PatternEntry { id: "candle.evening_star.v1", required_bars: 3, eval: candles::evening_star },
    PatternEntry { id: "candle.three_white_soldiers.v1", required_bars: 3, eval: candles::three_white_soldiers },
    PatternEntry { id: "candle.three_black_crows.v1", required_bars: 3, eval: candles::three_black_crows },
    PatternEntry { id: "indicator.ema20_above_ema50.v1", required_bars: 50, eval: trend::ema20_above_ema50 },
    PatternEntry { id: "indicator.ema20_below_ema50.v1", required_bars: 50, eval: trend::ema20_below_ema50 },
    PatternEntry { id: "indicator.ema20_cross_up_ema50.v1", required_bars: 51, eval: trend::ema_cross_up },
    PatternEntry { id: "indicator.ema20_cross_down_ema50.v1", required_bars: 51, eval: trend::ema_cross_down },
    PatternEntry { id: "indicator.rsi14_oversold.v1", required_bars: 15, eval: trend::rsi14_oversold },
    PatternEntry { id: "indicator.rsi14_overbought.v1", required_bars: 15, eval: trend::rsi14_overbought },
    PatternEntry { id: "indicator.breakout_high_20.v1", required_bars: 21, eval: breakout_high_20 },
    PatternEntry { id: "indicator.breakout_low_20.v1", required_bars: 21, eval: breakout_low_20 },
    PatternEntry { id: "indicator.breakout_high_55.v1", required_bars: 56, eval: breakout_high_55 },
    PatternEntry { id: "indicator.breakout_low_55.v1", required_bars: 56, eval: breakout_low_55 },
    PatternEntry { id: "structure.double_top_60.v1", required_bars: 64, eval: structure::double_top_60 },
    PatternEntry { id: "structure.double_bottom_60.v1", required_bars: 64, eval: structure::double_bottom_60 },
    PatternEntry {
        id: "structure.head_and_shoulders_90.v1",
        required_bars: 94,
        eval: structure::head_and_shoulders_90,
    },
    PatternEntry {
        id: "structure.inverse_head_and_shoulders_90.v1",
        required_bars: 94,
        eval: structure::inverse_head_and_shoulders_90,
    },
];

fn breakout_high_20(bars: &[Bar]) -> bool {
    trend::close_gt_high_n(bars, 20)
}
fn breakout_low_20(bars: &[Bar]) -> bool {
    trend::close_lt_low_n(bars, 20)
}
fn breakout_high_55(bars: &[Bar]) -> bool {
    trend::close_gt_high_n(bars, 55)
}
fn breakout_low_55(bars: &[Bar]) -> bool {
    trend::close_lt_low_n(bars, 55)
}

fn lookup(pattern_id: &str) -> Result<&'static PatternEntry, PatternError> {
    PATTERNS
        .iter()
        .find(|p| p.id == pattern_id)
        .ok_or_else(|| PatternError::UnknownPattern(pattern_id.to_string()))
}

/// Minimum bar count a pattern needs before it can be evaluated.
pub fn required_bars(pattern_id: &str) -> Result<usize, PatternError> {
    lookup(pattern_id).map(|p| p.required_bars)
}

/// Whether `pattern_id` names a known pattern.
pub fn is_known_pattern(pattern_id: &str) -> bool {
    PATTERNS.iter().any(|p| p.id == pattern_id)
}

/// Evaluate `pattern_id` against `bars`, using only the trailing
/// `required_bars` of the slice (oldest first, most recent last).
///
/// Insufficient history is not an error: the pattern simply doesn't hold yet.
pub fn evaluate(pattern_id: &str, bars: &[Bar]) -> Result<bool, PatternError> {
    let entry = lookup(pattern_id)?;
    if bars.len() < entry.required_bars {
        return Ok(false);
    }
    let window = &bars[bars.len() - entry.required_bars..];
    Ok((entry.eval)(window))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(o: f64, h: f64, l: f64, c: f64) -> Bar {
        Bar { open: o, high: h, low: l, close: c }
    }

    #[test]
    fn bullish_engulfing_via_registry() {
        let bars = vec![bar(10.0, 10.0, 7.0, 8.0), bar(7.0, 12.0, 6.0, 11.0)];
        assert_eq!(evaluate("candle.bullish_engulfing.v1", &bars).unwrap(), true);
    }

    #[test]
    fn unknown_pattern_errors() {
        let bars = vec![bar(1.0, 1.0, 1.0, 1.0)];
        assert!(matches!(evaluate("not.a.pattern", &bars), Err(PatternError::UnknownPattern(_))));
    }

    #[test]
    fn insufficient_bars_returns_false() {
        let bars = vec![bar(1.0, 1.0, 1.0, 1.0)];
        assert_eq!(evaluate("candle.bullish_engulfing.v1", &bars).unwrap(), false);
    }

    #[test]
    fn required_bars_table_matches_contract() {
        assert_eq!(required_bars("indicator.ema20_cross_up_ema50.v1").unwrap(), 51);
        assert_eq!(required_bars("structure.head_and_shoulders_90.v1").unwrap(), 94);
        assert_eq!(required_bars("candle.doji.v1").unwrap(), 1);
        assert_eq!(required_bars("indicator.breakout_high_20.v1").unwrap(), 21);
    }

    #[test]
    fn registry_ids_are_unique() {
        let mut ids: Vec<&str> = PATTERNS.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        let before = ids.len();
        ids.dedup();
        assert_eq!(before, ids.len());
    }
}
