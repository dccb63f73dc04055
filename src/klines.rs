// =============================================================================
// Kline Fetcher — REST candle proxy with normalization and advisory cache
// =============================================================================
//
// Adapted from the teacher's `binance/client.rs` reqwest usage (bounded
// timeout, Context-wrapped parse errors) and the kline JSON shape parsed in
// `market_data/candle_buffer.rs`, swapped from a WebSocket push format to a
// REST GET against a configurable `kline_info_url`. Only BTC is supported —
// any other coin is rejected at the validation step.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Context;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AppError;
use crate::patterns::Bar;

const WHITELISTED_INTERVALS: &[&str] = &["1m", "3m", "5m", "15m", "30m", "1h", "4h", "12h", "1d"];

pub fn interval_to_ms(interval: &str) -> Option<i64> {
    let (unit, value) = interval.split_at(interval.len() - 1);
    let n: i64 = unit.parse().ok()?;
    match value {
        "m" => Some(n * 60_000),
        "h" => Some(n * 3_600_000),
        "d" => Some(n * 86_400_000),
        _ => None,
    }
}

pub fn is_whitelisted_interval(interval: &str) -> bool {
    WHITELISTED_INTERVALS.contains(&interval)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Kline {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trades_count: Option<u64>,
}

impl Kline {
    pub fn as_bar(&self) -> Bar {
        Bar { open: self.open, high: self.high, low: self.low, close: self.close }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KlineResponse {
    pub intervals: HashMap<String, Vec<Kline>>,
    pub errors: HashMap<String, String>,
}

pub struct KlineFetcher {
    client: reqwest::Client,
    info_url: String,
    cache: RwLock<HashMap<String, (Instant, Vec<Kline>)>>,
    cache_ttl: Duration,
    default_limit: u32,
    max_limit: u32,
}

impl KlineFetcher {
    pub fn new(info_url: String, cache_ttl_sec: i64, default_limit: u32, max_limit: u32) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(6))
                .build()
                .expect("failed to build reqwest client"),
            info_url,
            cache: RwLock::new(HashMap::new()),
            cache_ttl: Duration::from_secs(cache_ttl_sec.max(0) as u64),
            default_limit,
            max_limit,
        }
    }

    /// Fetch candles for every requested interval for `coin`, collecting
    /// per-interval errors rather than failing the whole request.
    pub async fn fetch(
        &self,
        coin: &str,
        intervals: &[String],
        limit: Option<u32>,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<KlineResponse, AppError> {
        if coin != "BTC" {
            return Err(AppError::Validation(format!("unsupported coin: {coin}")));
        }
        let limit = limit.unwrap_or(self.default_limit).min(self.max_limit);

        let mut out = KlineResponse { intervals: HashMap::new(), errors: HashMap::new() };
        for interval in intervals {
            if !is_whitelisted_interval(interval) {
                out.errors.insert(interval.clone(), format!("unsupported interval: {interval}"));
                continue;
            }
            match self.fetch_one(interval, limit, start_time, end_time).await {
                Ok(klines) => {
                    out.intervals.insert(interval.clone(), klines);
                }
                Err(e) => {
                    warn!(interval = %interval, error = %e, "kline fetch failed");
                    out.errors.insert(interval.clone(), e.to_string());
                }
            }
        }
        Ok(out)
    }

    async fn fetch_one(
        &self,
        interval: &str,
        limit: u32,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> anyhow::Result<Vec<Kline>> {
        let mut url = format!("{}?symbol=BTCUSDT&interval={interval}&limit={limit}", self.info_url);
        if let Some(s) = start_time {
            url.push_str(&format!("&startTime={s}"));
        }
        if let Some(e) = end_time {
            url.push_str(&format!("&endTime={e}"));
        }

        if let Some((fetched_at, cached)) = self.cache.read().get(&url).cloned() {
            if fetched_at.elapsed() < self.cache_ttl {
                return Ok(cached);
            }
        }

        let raw: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("kline request failed for {url}"))?
            .error_for_status()
            .with_context(|| format!("kline upstream returned error status for {url}"))?
            .json()
            .await
            .context("failed to parse kline response as JSON")?;

        let rows = raw.as_array().context("kline response was not a JSON array")?;
        let mut klines = Vec::with_capacity(rows.len());
        for row in rows {
            klines.push(parse_kline_row(row, interval)?);
        }

        self.cache.write().insert(url, (Instant::now(), klines.clone()));
        Ok(klines)
    }
}

fn parse_kline_row(row: &serde_json::Value, interval: &str) -> anyhow::Result<Kline> {
    let arr = row.as_array().context("kline row was not an array")?;
    let open_time = arr.first().and_then(|v| v.as_i64()).context("missing open_time")?;
    let open = parse_string_f64(arr.get(1).context("missing open")?, "open")?;
    let high = parse_string_f64(arr.get(2).context("missing high")?, "high")?;
    let low = parse_string_f64(arr.get(3).context("missing low")?, "low")?;
    let close = parse_string_f64(arr.get(4).context("missing close")?, "close")?;
    let volume = parse_string_f64(arr.get(5).context("missing volume")?, "volume")?;
    let close_time = arr
        .get(6)
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| open_time + interval_to_ms(interval).unwrap_or(0) - 1);
    let trades_count = arr.get(8).and_then(|v| v.as_u64());

    Ok(Kline { open_time, close_time, open, high, low, close, volume, trades_count })
}

fn parse_string_f64(val: &serde_json::Value, name: &str) -> anyhow::Result<f64> {
    match val {
        serde_json::Value::String(s) => s.parse::<f64>().with_context(|| format!("invalid numeric string for {name}")),
        serde_json::Value::Number(n) => n.as_f64().with_context(|| format!("invalid numeric value for {name}")),
        _ => anyhow::bail!("unexpected type for {name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_to_ms_known_units() {
        assert_eq!(interval_to_ms("1m"), Some(60_000));
        assert_eq!(interval_to_ms("4h"), Some(14_400_000));
        assert_eq!(interval_to_ms("1d"), Some(86_400_000));
        assert_eq!(interval_to_ms("7x"), None);
    }

    #[test]
    fn whitelist_rejects_unknown_interval() {
        assert!(is_whitelisted_interval("15m"));
        assert!(!is_whitelisted_interval("2m"));
    }

    #[test]
    fn parse_kline_row_reads_array_shape() {
        let row = serde_json::json!([
            1700000000000i64, "100.0", "110.0", "90.0", "105.0", "12.5",
            1700000059999i64, "1312.5", 42
        ]);
        let k = parse_kline_row(&row, "1m").unwrap();
        assert_eq!(k.open_time, 1700000000000);
        assert_eq!(k.close_time, 1700000059999);
        assert!((k.close - 105.0).abs() < 1e-9);
        assert_eq!(k.trades_count, Some(42));
    }
}
