// =============================================================================
// Structural patterns — double top/bottom and head-and-shoulders
// =============================================================================
//
// Built on top of pivot detection (`pivots.rs`). Each pattern pins a pair (or
// triple) of pivots inside a fixed lookback window, derives a neckline from
// the trough(s)/peak(s) between them, and holds iff the current close has
// broken through that neckline.
// =============================================================================

use super::pivots::{pivot_highs, pivot_lows, Pivot};
use super::Bar;

const DOUBLE_LOOKBACK: usize = 60;
const HS_LOOKBACK: usize = 90;
const MIN_PIVOT_GAP: usize = 5;
const TOLERANCE: f64 = 0.01;

fn roughly_equal(a: f64, b: f64, tolerance: f64) -> bool {
    let avg = (a + b) / 2.0;
    if avg == 0.0 {
        return a == b;
    }
    ((a - b) / avg).abs() <= tolerance
}

/// Lowest low strictly between two indices (exclusive on both ends), or
/// `None` if there's no bar between them.
fn min_low_between(bars: &[Bar], from_idx: usize, to_idx: usize) -> Option<f64> {
    if to_idx <= from_idx + 1 {
        return None;
    }
    bars[from_idx + 1..to_idx]
        .iter()
        .map(|b| b.low)
        .fold(None, |acc, l| Some(acc.map_or(l, |m: f64| m.min(l))))
}

/// Highest high strictly between two indices (exclusive on both ends), or
/// `None` if there's no bar between them.
fn max_high_between(bars: &[Bar], from_idx: usize, to_idx: usize) -> Option<f64> {
    if to_idx <= from_idx + 1 {
        return None;
    }
    bars[from_idx + 1..to_idx]
        .iter()
        .map(|b| b.high)
        .fold(None, |acc, h| Some(acc.map_or(h, |m: f64| m.max(h))))
}

/// Find the two pivot highs to use for a double top: `p2` is the most recent
/// pivot high, `p1` is the most recent pivot high before it at least
/// `MIN_PIVOT_GAP` bars earlier.
fn last_pair(pivots: &[Pivot]) -> Option<(&Pivot, &Pivot)> {
    let p2 = pivots.last()?;
    let p1 = pivots
        .iter()
        .rev()
        .skip(1)
        .find(|p| p2.idx.saturating_sub(p.idx) >= MIN_PIVOT_GAP)?;
    Some((p1, p2))
}

pub fn double_top_60(bars: &[Bar]) -> bool {
    let highs = pivot_highs(bars, DOUBLE_LOOKBACK);
    let (p1, p2) = match last_pair(&highs) {
        Some(pair) => pair,
        None => return false,
    };
    if !roughly_equal(p1.price, p2.price, TOLERANCE) {
        return false;
    }
    let neckline = match min_low_between(bars, p1.idx, p2.idx) {
        Some(v) => v,
        None => return false,
    };
    let last_close = match bars.last() {
        Some(b) => b.close,
        None => return false,
    };
    last_close < neckline
}

pub fn double_bottom_60(bars: &[Bar]) -> bool {
    let lows = pivot_lows(bars, DOUBLE_LOOKBACK);
    let (p1, p2) = match last_pair(&lows) {
        Some(pair) => pair,
        None => return false,
    };
    if !roughly_equal(p1.price, p2.price, TOLERANCE) {
        return false;
    }
    let neckline = match max_high_between(bars, p1.idx, p2.idx) {
        Some(v) => v,
        None => return false,
    };
    let last_close = match bars.last() {
        Some(b) => b.close,
        None => return false,
    };
    last_close > neckline
}

/// Search all triples (LS, Head, RS) of pivot highs, most-recent-biased,
/// returning the first one satisfying the shoulder/head tolerance rule.
fn find_hs_triple(pivots: &[Pivot]) -> Option<(&Pivot, &Pivot, &Pivot)> {
    let n = pivots.len();
    for rs_i in (2..n).rev() {
        for head_i in (1..rs_i).rev() {
            for ls_i in (0..head_i).rev() {
                let ls = &pivots[ls_i];
                let head = &pivots[head_i];
                let rs = &pivots[rs_i];
                if !roughly_equal(ls.price, rs.price, TOLERANCE) {
                    continue;
                }
                let greater_shoulder = ls.price.max(rs.price);
                if head.price < greater_shoulder * 1.01 {
                    continue;
                }
                return Some((ls, head, rs));
            }
        }
    }
    None
}

/// Mirror of `find_hs_triple` for pivot lows (inverse head & shoulders):
/// the head must be at least 1% *below* the lesser shoulder.
fn find_inverse_hs_triple(pivots: &[Pivot]) -> Option<(&Pivot, &Pivot, &Pivot)> {
    let n = pivots.len();
    for rs_i in (2..n).rev() {
        for head_i in (1..rs_i).rev() {
            for ls_i in (0..head_i).rev() {
                let ls = &pivots[ls_i];
                let head = &pivots[head_i];
                let rs = &pivots[rs_i];
                if !roughly_equal(ls.price, rs.price, TOLERANCE) {
                    continue;
                }
                let lesser_shoulder = ls.price.min(rs.price);
                if head.price > lesser_shoulder * 0.99 {
                    continue;
                }
                return Some((ls, head, rs));
            }
        }
    }
    None
}

pub fn head_and_shoulders_90(bars: &[Bar]) -> bool {
    let highs = pivot_highs(bars, HS_LOOKBACK);
    let (ls, head, rs) = match find_hs_triple(&highs) {
        Some(t) => t,
        None => return false,
    };
    let lows = pivot_lows(bars, HS_LOOKBACK);
    let trough1 = match lows.iter().rev().find(|p| p.idx > ls.idx && p.idx < head.idx) {
        Some(p) => p.price,
        None => return false,
    };
    let trough2 = match lows.iter().rev().find(|p| p.idx > head.idx && p.idx < rs.idx) {
        Some(p) => p.price,
        None => return false,
    };
    let neckline = (trough1 + trough2) / 2.0;
    bars.last().map(|b| b.close < neckline).unwrap_or(false)
}

pub fn inverse_head_and_shoulders_90(bars: &[Bar]) -> bool {
    let lows = pivot_lows(bars, HS_LOOKBACK);
    let (ls, head, rs) = match find_inverse_hs_triple(&lows) {
        Some(t) => t,
        None => return false,
    };
    let highs = pivot_highs(bars, HS_LOOKBACK);
    let peak1 = match highs.iter().rev().find(|p| p.idx > ls.idx && p.idx < head.idx) {
        Some(p) => p.price,
        None => return false,
    };
    let peak2 = match highs.iter().rev().find(|p| p.idx > head.idx && p.idx < rs.idx) {
        Some(p) => p.price,
        None => return false,
    };
    let neckline = (peak1 + peak2) / 2.0;
    bars.last().map(|b| b.close > neckline).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(h: f64, l: f64) -> Bar {
        Bar { open: h.min(l), high: h, low: l, close: (h + l) / 2.0 }
    }

    fn bar_close(h: f64, l: f64, c: f64) -> Bar {
        Bar { open: h.min(l), high: h, low: l, close: c }
    }

    fn flat(n: usize, h: f64, l: f64) -> Vec<Bar> {
        (0..n).map(|_| bar(h, l)).collect()
    }

    #[test]
    fn double_top_detects_breakdown_below_neckline() {
        let mut bars = flat(10, 10.0, 5.0);
        bars.push(bar(20.0, 10.0));
        bars.extend(flat(5, 10.0, 5.0));
        bars.push(bar(5.0, 2.0)); // neckline trough
        bars.extend(flat(5, 10.0, 5.0));
        bars.push(bar(20.1, 10.0));
        bars.extend(flat(3, 10.0, 5.0));
        bars.push(bar_close(10.0, 1.0, 1.5)); // closes below neckline (2.0)
        assert!(double_top_60(&bars));
    }

    #[test]
    fn double_top_rejects_unequal_peaks() {
        let mut bars = flat(10, 10.0, 5.0);
        bars.push(bar(20.0, 10.0));
        bars.extend(flat(5, 10.0, 5.0));
        bars.push(bar(5.0, 2.0));
        bars.extend(flat(5, 10.0, 5.0));
        bars.push(bar(30.0, 10.0));
        bars.extend(flat(5, 10.0, 5.0));
        assert!(!double_top_60(&bars));
    }

    #[test]
    fn insufficient_pivots_returns_false() {
        let bars = flat(20, 10.0, 5.0);
        assert!(!double_top_60(&bars));
        assert!(!head_and_shoulders_90(&bars));
    }
}
