// =============================================================================
// Candlestick patterns — single, two, and three bar formations
// =============================================================================
//
// Every function takes the trailing bars it needs (most recent last) and
// returns whether the pattern is present on the final bar of the slice.
// Callers are responsible for slicing exactly `required_bars()` bars from
// the end of a longer series before calling these.
// =============================================================================

use super::Bar;

fn body(b: &Bar) -> f64 {
    (b.close - b.open).abs()
}

fn range(b: &Bar) -> f64 {
    b.high - b.low
}

fn upper_wick(b: &Bar) -> f64 {
    b.high - b.open.max(b.close)
}

fn lower_wick(b: &Bar) -> f64 {
    b.open.min(b.close) - b.low
}

fn is_bullish(b: &Bar) -> bool {
    b.close > b.open
}

fn is_bearish(b: &Bar) -> bool {
    b.close < b.open
}

/// Prior bar bearish, current bullish, and current body fully engulfs the
/// prior body (current open <= prior close, current close >= prior open).
pub fn bullish_engulfing(bars: &[Bar]) -> bool {
    let [prev, curr] = match bars {
        [a, b] => [a, b],
        _ => return false,
    };
    is_bearish(prev)
        && is_bullish(curr)
        && curr.open <= prev.close
        && curr.close >= prev.open
}

/// Prior bar bullish, current bearish, and current body fully engulfs the
/// prior body (current open >= prior close, current close <= prior open).
pub fn bearish_engulfing(bars: &[Bar]) -> bool {
    let [prev, curr] = match bars {
        [a, b] => [a, b],
        _ => return false,
    };
    is_bullish(prev)
        && is_bearish(curr)
        && curr.open >= prev.close
        && curr.close <= prev.open
}

/// Small body in the upper third of the range, lower wick at least twice the
/// body, negligible upper wick.
pub fn hammer(bars: &[Bar]) -> bool {
    let b = match bars {
        [b] => b,
        _ => return false,
    };
    single_bar_shape(b, true)
}

/// Small body in the lower third of the range, upper wick at least twice the
/// body, negligible lower wick.
pub fn shooting_star(bars: &[Bar]) -> bool {
    let b = match bars {
        [b] => b,
        _ => return false,
    };
    single_bar_shape(b, false)
}

fn single_bar_shape(b: &Bar, hammer_shape: bool) -> bool {
    let r = range(b);
    if r <= 0.0 {
        return false;
    }
    let bd = body(b);
    if bd > r * 0.3 {
        return false;
    }
    let long_wick = if hammer_shape { lower_wick(b) } else { upper_wick(b) };
    let short_wick = if hammer_shape { upper_wick(b) } else { lower_wick(b) };
    long_wick >= bd * 2.0 && long_wick > 0.0 && short_wick <= r * 0.25
}

/// Body is a negligible fraction of the bar's range.
pub fn doji(bars: &[Bar]) -> bool {
    let b = match bars {
        [b] => b,
        _ => return false,
    };
    let r = range(b);
    r > 0.0 && body(b) <= r * 0.1
}

/// Current bar's high/low fully contained within the prior bar's high/low.
pub fn inside_bar(bars: &[Bar]) -> bool {
    let [prev, curr] = match bars {
        [a, b] => [a, b],
        _ => return false,
    };
    curr.high <= prev.high && curr.low >= prev.low
}

/// Current bar's high/low fully contains the prior bar's high/low.
pub fn outside_bar(bars: &[Bar]) -> bool {
    let [prev, curr] = match bars {
        [a, b] => [a, b],
        _ => return false,
    };
    curr.high >= prev.high && curr.low <= prev.low
}

/// Strong bearish bar, small-bodied middle bar, bullish bar closing back at
/// or above the midpoint of the first bar's body.
pub fn morning_star(bars: &[Bar]) -> bool {
    let [first, middle, last] = match bars {
        [a, b, c] => [a, b, c],
        _ => return false,
    };
    let first_range = range(first);
    let middle_range = range(middle);
    if first_range <= 0.0 || middle_range <= 0.0 {
        return false;
    }
    let first_mid = (first.open + first.close) / 2.0;
    is_bearish(first)
        && body(first) / first_range >= 0.5
        && body(middle) / middle_range <= 0.3
        && is_bullish(last)
        && last.close >= first_mid
}

/// Strong bullish bar, small-bodied middle bar, bearish bar closing back at
/// or below the midpoint of the first bar's body.
pub fn evening_star(bars: &[Bar]) -> bool {
    let [first, middle, last] = match bars {
        [a, b, c] => [a, b, c],
        _ => return false,
    };
    let first_range = range(first);
    let middle_range = range(middle);
    if first_range <= 0.0 || middle_range <= 0.0 {
        return false;
    }
    let first_mid = (first.open + first.close) / 2.0;
    is_bullish(first)
        && body(first) / first_range >= 0.5
        && body(middle) / middle_range <= 0.3
        && is_bearish(last)
        && last.close <= first_mid
}

/// Three consecutive bullish bars, each closing higher than the last with
/// each open falling inside the prior bar's body.
pub fn three_white_soldiers(bars: &[Bar]) -> bool {
    let [a, b, c] = match bars {
        [a, b, c] => [a, b, c],
        _ => return false,
    };
    is_bullish(a)
        && is_bullish(b)
        && is_bullish(c)
        && b.close > a.close
        && c.close > b.close
        && b.open > a.open.min(a.close)
        && b.open < a.open.max(a.close)
        && c.open > b.open.min(b.close)
        && c.open < b.open.max(b.close)
}

/// Three consecutive bearish bars, each closing lower than the last with
/// each open falling inside the prior bar's body.
pub fn three_black_crows(bars: &[Bar]) -> bool {
    let [a, b, c] = match bars {
        [a, b, c] => [a, b, c],
        _ => return false,
    };
    is_bearish(a)
        && is_bearish(b)
        && is_bearish(c)
        && b.close < a.close
        && c.close < b.close
        && b.open > a.open.min(a.close)
        && b.open < a.open.max(a.close)
        && c.open > b.open.min(b.close)
        && c.open < b.open.max(b.close)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(o: f64, h: f64, l: f64, c: f64) -> Bar {
        Bar { open: o, high: h, low: l, close: c }
    }

    #[test]
    fn bullish_engulfing_detects() {
        let bars = vec![bar(10.0, 10.5, 9.0, 9.5), bar(9.0, 11.0, 8.8, 10.8)];
        assert!(bullish_engulfing(&bars));
        assert!(!bearish_engulfing(&bars));
    }

    #[test]
    fn bearish_engulfing_detects() {
        let bars = vec![bar(9.0, 10.5, 8.8, 10.0), bar(10.2, 10.5, 8.5, 8.7)];
        assert!(bearish_engulfing(&bars));
    }

    #[test]
    fn hammer_detects() {
        let bars = vec![bar(10.0, 10.2, 8.0, 10.1)];
        assert!(hammer(&bars));
        assert!(!shooting_star(&bars));
    }

    #[test]
    fn shooting_star_detects() {
        let bars = vec![bar(10.0, 12.0, 9.9, 10.1)];
        assert!(shooting_star(&bars));
    }

    #[test]
    fn doji_detects() {
        let bars = vec![bar(10.0, 10.5, 9.5, 10.02)];
        assert!(doji(&bars));
    }

    #[test]
    fn inside_and_outside_bar() {
        let inside = vec![bar(10.0, 11.0, 9.0, 10.5), bar(10.2, 10.8, 9.5, 10.3)];
        assert!(inside_bar(&inside));
        assert!(!outside_bar(&inside));

        let outside = vec![bar(10.0, 10.8, 9.5, 10.3), bar(10.2, 11.0, 9.0, 10.5)];
        assert!(outside_bar(&outside));
    }

    #[test]
    fn morning_star_detects() {
        let bars = vec![
            bar(12.0, 12.1, 10.0, 10.2),
            bar(9.8, 10.0, 9.5, 9.9),
            bar(10.0, 12.0, 9.9, 11.5),
        ];
        assert!(morning_star(&bars));
    }

    #[test]
    fn evening_star_detects() {
        let bars = vec![
            bar(10.0, 12.1, 9.9, 12.0),
            bar(12.2, 12.5, 12.0, 12.3),
            bar(12.0, 12.1, 9.5, 9.8),
        ];
        assert!(evening_star(&bars));
    }

    #[test]
    fn three_white_soldiers_detects() {
        let bars = vec![bar(10.0, 10.6, 9.9, 10.5), bar(10.2, 11.1, 10.1, 11.0), bar(10.6, 11.6, 10.5, 11.5)];
        assert!(three_white_soldiers(&bars));
        assert!(!three_black_crows(&bars));
    }

    #[test]
    fn three_black_crows_detects() {
        let bars = vec![bar(11.5, 11.6, 10.9, 11.0), bar(11.2, 11.3, 10.1, 10.3), bar(10.6, 10.7, 9.4, 9.5)];
        assert!(three_black_crows(&bars));
    }
}
