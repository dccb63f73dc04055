// =============================================================================
// Pivot detection — local extrema over a fixed span of neighbouring bars
// =============================================================================
//
// A pivot high at index `i` requires `bars[i].high` to be strictly greater
// than the high at all four neighbours `i-2, i-1, i+1, i+2` (span = 2).
// Pivot lows are the symmetric case on `low`. Pivots are searched inside the
// last `lookback` bars of the slice, excluding the outermost `span` bars on
// each side (those can't have a full neighbourhood).
// =============================================================================

use super::Bar;

pub const PIVOT_SPAN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pivot {
    /// Index into the original `bars` slice.
    pub idx: usize,
    pub price: f64,
}

/// Find all pivot highs within the last `lookback` bars of `bars`.
/// Returned in ascending index order.
pub fn pivot_highs(bars: &[Bar], lookback: usize) -> Vec<Pivot> {
    find_pivots(bars, lookback, true)
}

/// Find all pivot lows within the last `lookback` bars of `bars`.
/// Returned in ascending index order.
pub fn pivot_lows(bars: &[Bar], lookback: usize) -> Vec<Pivot> {
    find_pivots(bars, lookback, false)
}

fn find_pivots(bars: &[Bar], lookback: usize, highs: bool) -> Vec<Pivot> {
    let n = bars.len();
    if n == 0 {
        return Vec::new();
    }
    let window_start = n.saturating_sub(lookback);
    let scan_start = (window_start + PIVOT_SPAN).max(PIVOT_SPAN);
    let scan_end = n.saturating_sub(PIVOT_SPAN);

    let mut out = Vec::new();
    let mut i = scan_start;
    while i < scan_end {
        let value = if highs { bars[i].high } else { bars[i].low };
        let is_pivot = (i.saturating_sub(PIVOT_SPAN)..=i + PIVOT_SPAN)
            .filter(|&j| j != i)
            .all(|j| {
                let neighbour = if highs { bars[j].high } else { bars[j].low };
                if highs {
                    value > neighbour
                } else {
                    value < neighbour
                }
            });
        if is_pivot {
            out.push(Pivot { idx: i, price: value });
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(h: f64, l: f64) -> Bar {
        Bar { open: h.min(l), high: h, low: l, close: (h + l) / 2.0 }
    }

    #[test]
    fn detects_single_pivot_high() {
        let bars = vec![
            bar(10.0, 5.0),
            bar(11.0, 6.0),
            bar(15.0, 7.0),
            bar(11.0, 6.0),
            bar(10.0, 5.0),
        ];
        let highs = pivot_highs(&bars, 5);
        assert_eq!(highs, vec![Pivot { idx: 2, price: 15.0 }]);
    }

    #[test]
    fn detects_single_pivot_low() {
        let bars = vec![
            bar(10.0, 8.0),
            bar(11.0, 6.0),
            bar(12.0, 2.0),
            bar(11.0, 6.0),
            bar(10.0, 8.0),
        ];
        let lows = pivot_lows(&bars, 5);
        assert_eq!(lows, vec![Pivot { idx: 2, price: 2.0 }]);
    }

    #[test]
    fn no_pivot_when_tied() {
        let bars = vec![
            bar(10.0, 5.0),
            bar(15.0, 6.0),
            bar(15.0, 7.0),
            bar(11.0, 6.0),
            bar(10.0, 5.0),
        ];
        assert!(pivot_highs(&bars, 5).is_empty());
    }

    #[test]
    fn excludes_outermost_span_bars() {
        let bars = vec![bar(20.0, 1.0), bar(5.0, 1.0), bar(5.0, 1.0), bar(5.0, 1.0), bar(20.0, 1.0)];
        // idx 0 and idx 4 sit at the edges of a span-2 window and can't be
        // evaluated (missing one side of neighbours), so no pivot appears.
        assert!(pivot_highs(&bars, 5).is_empty());
    }
}
