// =============================================================================
// Prediction Tournament Engine — Main Entry Point
// =============================================================================
//
// Boots the Store, Live Price Feed, and Kline Fetcher, then serves the HTTP
// API while two background loops run the Round Lifecycle Engine and the
// Reason Rule sweep — the same "spawn a task per duty, reconnect-in-5s
// streams, ctrl_c for graceful shutdown" shape this engine always used.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod agents;
mod api;
mod config;
mod error;
mod judgments;
mod klines;
mod patterns;
mod price_feed;
mod reason_rule;
mod reason_stats;
mod rounds;
mod state_advancer;
mod store;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::routes::AppState;
use crate::config::Config;
use crate::klines::KlineFetcher;
use crate::price_feed::PriceFeed;
use crate::store::Store;

const CONFIG_PATH: &str = "config.json";
const DB_PATH: &str = "tournament.sqlite3";
const ADVANCER_INTERVAL: Duration = Duration::from_secs(5);
const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("prediction tournament engine starting up");

    let mut config = Config::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    });
    config.admin_api_token = std::env::var("ADMIN_API_TOKEN").unwrap_or_default();
    if config.admin_api_token.is_empty() {
        warn!("ADMIN_API_TOKEN is not set; admin-only endpoints will reject all requests");
    }
    let config = Arc::new(config);

    // ── 2. Store ──────────────────────────────────────────────────────────
    let store = Store::open(DB_PATH)?;

    // ── 3. Live Price Feed ────────────────────────────────────────────────
    let feed = PriceFeed::spawn(config.ws_url.clone(), config.feed_mode.clone(), config.coin.clone());

    // ── 4. Kline Fetcher ──────────────────────────────────────────────────
    let fetcher = Arc::new(KlineFetcher::new(
        config.kline_info_url.clone(),
        config.kline_cache_sec,
        config.kline_default_limit,
        config.kline_max_limit,
    ));

    // ── 5. Round Lifecycle Engine ─────────────────────────────────────────
    {
        let store = store.clone();
        let feed = feed.clone();
        let config = config.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ADVANCER_INTERVAL);
            loop {
                interval.tick().await;
                let now_ms = chrono::Utc::now().timestamp_millis();
                if let Err(e) = state_advancer::tick(&store, &feed, &config, now_ms).await {
                    error!(error = %e, "state advancer tick failed");
                }
            }
        });
    }

    // ── 6. Reason Rule sweep ──────────────────────────────────────────────
    {
        let store = store.clone();
        let fetcher = fetcher.clone();
        let config = config.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let now_ms = chrono::Utc::now().timestamp_millis();
                match reason_rule::sweep_pending(
                    &store,
                    &fetcher,
                    &config.coin,
                    now_ms,
                    config.sweep_max_rows,
                    config.flat_threshold_pct,
                )
                .await
                {
                    Ok(n) if n > 0 => info!(evaluated = n, "reason rule sweep evaluated judgments"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "reason rule sweep failed"),
                }
            }
        });
    }

    // ── 7. API server ─────────────────────────────────────────────────────
    let claim_base_url = std::env::var("CLAIM_BASE_URL").unwrap_or_else(|_| "http://localhost:3001".into());
    let state = AppState { store: store.clone(), fetcher, feed, config: config.clone(), claim_base_url };
    let app = api::routes::router(state);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind API server");
    info!(addr = %bind_addr, "API server listening");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server error");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 8. Graceful shutdown ──────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");
    server.abort();

    if let Err(e) = config.save(CONFIG_PATH) {
        error!(error = %e, "failed to save config on shutdown");
    }

    info!("prediction tournament engine shut down complete");
    Ok(())
}
