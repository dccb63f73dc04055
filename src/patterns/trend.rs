// =============================================================================
// Trend and momentum patterns — EMA relation/cross, RSI extremes, breakouts
// =============================================================================

use super::ema::{last_ema, prev_ema};
use super::rsi::last_rsi;
use super::Bar;

const EMA_FAST: usize = 20;
const EMA_SLOW: usize = 50;
const RSI_PERIOD: usize = 14;
const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;

fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

pub fn ema20_above_ema50(bars: &[Bar]) -> bool {
    let c = closes(bars);
    match (last_ema(&c, EMA_FAST), last_ema(&c, EMA_SLOW)) {
        (Some(fast), Some(slow)) => fast > slow,
        _ => false,
    }
}

pub fn ema20_below_ema50(bars: &[Bar]) -> bool {
    let c = closes(bars);
    match (last_ema(&c, EMA_FAST), last_ema(&c, EMA_SLOW)) {
        (Some(fast), Some(slow)) => fast < slow,
        _ => false,
    }
}

/// EMA20 was at or below EMA50 on the previous bar and is now strictly above.
pub fn ema_cross_up(bars: &[Bar]) -> bool {
    let c = closes(bars);
    let (fast_prev, slow_prev) = match (prev_ema(&c, EMA_FAST), prev_ema(&c, EMA_SLOW)) {
        (Some(f), Some(s)) => (f, s),
        _ => return false,
    };
    let (fast_now, slow_now) = match (last_ema(&c, EMA_FAST), last_ema(&c, EMA_SLOW)) {
        (Some(f), Some(s)) => (f, s),
        _ => return false,
    };
    fast_prev <= slow_prev && fast_now > slow_now
}

/// EMA20 was at or above EMA50 on the previous bar and is now strictly below.
pub fn ema_cross_down(bars: &[Bar]) -> bool {
    let c = closes(bars);
    let (fast_prev, slow_prev) = match (prev_ema(&c, EMA_FAST), prev_ema(&c, EMA_SLOW)) {
        (Some(f), Some(s)) => (f, s),
        _ => return false,
    };
    let (fast_now, slow_now) = match (last_ema(&c, EMA_FAST), last_ema(&c, EMA_SLOW)) {
        (Some(f), Some(s)) => (f, s),
        _ => return false,
    };
    fast_prev >= slow_prev && fast_now < slow_now
}

pub fn rsi14_oversold(bars: &[Bar]) -> bool {
    let c = closes(bars);
    last_rsi(&c, RSI_PERIOD).map(|v| v < RSI_OVERSOLD).unwrap_or(false)
}

pub fn rsi14_overbought(bars: &[Bar]) -> bool {
    let c = closes(bars);
    last_rsi(&c, RSI_PERIOD).map(|v| v > RSI_OVERBOUGHT).unwrap_or(false)
}

/// Most recent close is strictly greater than the highest high of the
/// preceding `n` bars.
pub fn close_gt_high_n(bars: &[Bar], n: usize) -> bool {
    if bars.len() < n + 1 {
        return false;
    }
    let last = bars.last().unwrap();
    let window = &bars[bars.len() - 1 - n..bars.len() - 1];
    let highest = window.iter().fold(f64::NEG_INFINITY, |acc, b| acc.max(b.high));
    last.close > highest
}

/// Most recent close is strictly less than the lowest low of the preceding
/// `n` bars.
pub fn close_lt_low_n(bars: &[Bar], n: usize) -> bool {
    if bars.len() < n + 1 {
        return false;
    }
    let last = bars.last().unwrap();
    let window = &bars[bars.len() - 1 - n..bars.len() - 1];
    let lowest = window.iter().fold(f64::INFINITY, |acc, b| acc.min(b.low));
    last.close < lowest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(close: f64) -> Bar {
        Bar { open: close, high: close, low: close, close }
    }

    #[test]
    fn breakout_detects_new_high() {
        let mut bars: Vec<Bar> = (1..=20).map(|i| bar(i as f64)).collect();
        bars.push(bar(100.0));
        assert!(close_gt_high_n(&bars, 20));
        assert!(!close_lt_low_n(&bars, 20));
    }

    #[test]
    fn breakout_detects_new_low() {
        let mut bars: Vec<Bar> = (1..=20).rev().map(|i| bar(i as f64)).collect();
        bars.push(bar(0.1));
        assert!(close_lt_low_n(&bars, 20));
    }

    #[test]
    fn breakout_insufficient_bars() {
        let bars: Vec<Bar> = (1..=5).map(|i| bar(i as f64)).collect();
        assert!(!close_gt_high_n(&bars, 20));
    }

    #[test]
    fn ema_cross_up_detects() {
        // A descending-then-rising series should cross EMA20 above EMA50 at
        // some point once enough bars accumulate.
        let mut closes: Vec<f64> = (0..60).map(|i| 100.0 - i as f64 * 0.5).collect();
        closes.extend((0..10).map(|i| closes.last().unwrap() + i as f64 * 3.0));
        let bars: Vec<Bar> = closes.into_iter().map(bar).collect();
        // Not asserting true/false deterministically here would be brittle;
        // just ensure it doesn't panic and returns a bool either way.
        let _ = ema_cross_up(&bars);
    }

    #[test]
    fn rsi_extremes_need_enough_bars() {
        let bars: Vec<Bar> = (1..=5).map(|i| bar(i as f64)).collect();
        assert!(!rsi14_oversold(&bars));
        assert!(!rsi14_overbought(&bars));
    }
}
