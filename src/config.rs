// =============================================================================
// Runtime Configuration — hot-reloadable engine settings with atomic save
// =============================================================================
//
// Every tunable parameter from spec.md §6 lives here. All fields carry
// `#[serde(default = "...")]` so that adding new fields never breaks loading
// an older config file, and persistence uses an atomic tmp + rename pattern
// to prevent corruption on crash — same discipline as the engine this one
// was bootstrapped from.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_round_duration_min() -> i64 {
    30
}
fn default_price_refresh_ms() -> i64 {
    10_000
}
fn default_price_stale_ms() -> i64 {
    30_000
}
fn default_lock_window_min() -> i64 {
    10
}
fn default_signature_window_sec() -> i64 {
    300
}
fn default_flat_threshold_pct() -> f64 {
    0.2
}
fn default_feed_limit() -> usize {
    200
}
fn default_verdict_limit() -> usize {
    200
}
fn default_judgment_limit() -> usize {
    800
}
fn default_round_limit() -> usize {
    200
}
fn default_score_event_limit() -> usize {
    1000
}
fn default_ws_url() -> String {
    "wss://api.hyperliquid.xyz/ws".to_string()
}
fn default_feed_mode() -> String {
    "allMids".to_string()
}
fn default_coin() -> String {
    "BTC".to_string()
}
fn default_kline_info_url() -> String {
    "https://api.binance.com/api/v3/klines".to_string()
}
fn default_intervals() -> Vec<String> {
    vec!["1m".into(), "5m".into(), "15m".into(), "1h".into()]
}
fn default_kline_limit() -> u32 {
    200
}
fn default_kline_max_limit() -> u32 {
    500
}
fn default_kline_cache_sec() -> i64 {
    15
}
fn default_sweep_max_rows() -> usize {
    50
}

/// Top-level runtime configuration for the tournament engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_round_duration_min")]
    pub round_duration_min: i64,
    #[serde(default = "default_price_refresh_ms")]
    pub price_refresh_ms: i64,
    #[serde(default = "default_price_stale_ms")]
    pub price_stale_ms: i64,
    #[serde(default = "default_lock_window_min")]
    pub lock_window_min: i64,
    #[serde(default = "default_signature_window_sec")]
    pub signature_window_sec: i64,
    #[serde(default = "default_flat_threshold_pct")]
    pub flat_threshold_pct: f64,

    #[serde(default = "default_feed_limit")]
    pub feed_limit: usize,
    #[serde(default = "default_verdict_limit")]
    pub verdict_limit: usize,
    #[serde(default = "default_judgment_limit")]
    pub judgment_limit: usize,
    #[serde(default = "default_round_limit")]
    pub round_limit: usize,
    #[serde(default = "default_score_event_limit")]
    pub score_event_limit: usize,

    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_feed_mode")]
    pub feed_mode: String,
    #[serde(default = "default_coin")]
    pub coin: String,

    #[serde(default = "default_kline_info_url")]
    pub kline_info_url: String,
    #[serde(default = "default_intervals")]
    pub default_intervals: Vec<String>,
    #[serde(default = "default_kline_limit")]
    pub kline_default_limit: u32,
    #[serde(default = "default_kline_max_limit")]
    pub kline_max_limit: u32,
    #[serde(default = "default_kline_cache_sec")]
    pub kline_cache_sec: i64,

    #[serde(default = "default_sweep_max_rows")]
    pub sweep_max_rows: usize,

    /// Bearer token guarding admin endpoints. Read once at startup; not
    /// serialized back to disk (always overridden by env on load/save).
    #[serde(default, skip_serializing)]
    pub admin_api_token: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            round_duration_min: default_round_duration_min(),
            price_refresh_ms: default_price_refresh_ms(),
            price_stale_ms: default_price_stale_ms(),
            lock_window_min: default_lock_window_min(),
            signature_window_sec: default_signature_window_sec(),
            flat_threshold_pct: default_flat_threshold_pct(),
            feed_limit: default_feed_limit(),
            verdict_limit: default_verdict_limit(),
            judgment_limit: default_judgment_limit(),
            round_limit: default_round_limit(),
            score_event_limit: default_score_event_limit(),
            ws_url: default_ws_url(),
            feed_mode: default_feed_mode(),
            coin: default_coin(),
            kline_info_url: default_kline_info_url(),
            default_intervals: default_intervals(),
            kline_default_limit: default_kline_limit(),
            kline_max_limit: default_kline_max_limit(),
            kline_cache_sec: default_kline_cache_sec(),
            sweep_max_rows: default_sweep_max_rows(),
            admin_api_token: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file at `path`, falling back to
    /// defaults (with a warning logged by the caller) if the file is
    /// missing or malformed. The admin token is always sourced from the
    /// environment, never from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;
        config.admin_api_token = std::env::var("ADMIN_API_TOKEN").unwrap_or_default();
        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename), guarding against corruption on a
    /// mid-write crash. Secrets are never written to disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).context("failed to serialize config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }

    pub fn lock_window_ms(&self) -> i64 {
        self.lock_window_min * 60_000
    }

    pub fn round_duration_ms(&self) -> i64 {
        self.round_duration_min * 60_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = Config::default();
        assert_eq!(cfg.round_duration_min, 30);
        assert_eq!(cfg.lock_window_min, 10);
        assert!((cfg.flat_threshold_pct - 0.2).abs() < f64::EPSILON);
        assert_eq!(cfg.coin, "BTC");
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.round_duration_min, 30);
        assert_eq!(cfg.kline_default_limit, 200);
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "round_duration_min": 45 }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.round_duration_min, 45);
        assert_eq!(cfg.lock_window_min, 10);
    }

    #[test]
    fn lock_window_and_duration_ms_conversion() {
        let cfg = Config::default();
        assert_eq!(cfg.lock_window_ms(), 10 * 60_000);
        assert_eq!(cfg.round_duration_ms(), 30 * 60_000);
    }
}
