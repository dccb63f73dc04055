// =============================================================================
// Live Price Feed — singleton actor over a tokio-tungstenite WebSocket
// =============================================================================
//
// One spawned task owns the socket; every caller talks to it through an
// `mpsc::Sender<FeedRequest>` carrying a `oneshot::Sender` for the reply, so
// `price()`/`diag()` never touch the socket directly. Reconnect-on-close and
// the 5s connect-timeout mirror the teacher's "reconnect in 5s" stream-spawn
// loops in `main.rs`; because only the actor task ever initiates a connect,
// concurrent callers during a reconnect always observe one in-flight attempt.
// =============================================================================

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnState {
    Closed,
    Connecting,
    Connected,
    Error,
}

impl ConnState {
    fn as_str(&self) -> &'static str {
        match self {
            ConnState::Closed => "closed",
            ConnState::Connecting => "connecting",
            ConnState::Connected => "connected",
            ConnState::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PriceSample {
    pub price: f64,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedDiag {
    pub state: &'static str,
    pub last_error: Option<String>,
    pub last_event_at_ms: Option<i64>,
    pub last_update_at_ms: Option<i64>,
    pub feed_mode: String,
    pub coin: String,
}

enum FeedRequest {
    Price(oneshot::Sender<Option<PriceSample>>),
    Diag(oneshot::Sender<FeedDiag>),
}

#[derive(Clone)]
pub struct PriceFeed {
    tx: mpsc::Sender<FeedRequest>,
}

struct FeedActor {
    ws_url: String,
    feed_mode: String,
    coin: String,
    state: ConnState,
    last_error: Option<String>,
    last_event_at_ms: Option<i64>,
    latest: Option<PriceSample>,
}

impl PriceFeed {
    /// Spawns the owning task and returns a cheap-to-clone handle.
    pub fn spawn(ws_url: String, feed_mode: String, coin: String) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let actor = FeedActor {
            ws_url,
            feed_mode,
            coin,
            state: ConnState::Closed,
            last_error: None,
            last_event_at_ms: None,
            latest: None,
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    pub async fn price(&self) -> Option<PriceSample> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(FeedRequest::Price(tx)).await.is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn diag(&self) -> Option<FeedDiag> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(FeedRequest::Diag(tx)).await.is_err() {
            return None;
        }
        rx.await.ok()
    }
}

impl FeedActor {
    async fn run(mut self, mut rx: mpsc::Receiver<FeedRequest>) {
        loop {
            self.state = ConnState::Connecting;
            match timeout(CONNECT_TIMEOUT, connect_async(&self.ws_url)).await {
                Ok(Ok((mut socket, _))) => {
                    self.state = ConnState::Connected;
                    self.last_error = None;
                    info!(url = %self.ws_url, "price feed connected");

                    if let Err(e) = Self::send_subscription(&mut socket, &self.feed_mode, &self.coin).await {
                        warn!(error = %e, "failed to send subscription request");
                    }

                    loop {
                        tokio::select! {
                            msg = socket.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => self.handle_message(&text),
                                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                                    Some(Ok(Message::Close(_))) | None => {
                                        warn!("price feed socket closed");
                                        break;
                                    }
                                    Some(Err(e)) => {
                                        error!(error = %e, "price feed socket error");
                                        self.last_error = Some(e.to_string());
                                        break;
                                    }
                                    _ => {}
                                }
                            }
                            req = rx.recv() => {
                                match req {
                                    Some(r) => self.handle_request(r),
                                    None => return,
                                }
                            }
                        }
                    }
                }
                Ok(Err(e)) => {
                    error!(error = %e, "price feed connect failed");
                    self.last_error = Some(e.to_string());
                }
                Err(_) => {
                    error!("price feed connect timed out");
                    self.last_error = Some("connect timeout".to_string());
                }
            }

            self.state = ConnState::Error;
            if !Self::drain_requests_during_backoff(&mut rx, &mut self).await {
                return;
            }
        }
    }

    async fn drain_requests_during_backoff(rx: &mut mpsc::Receiver<FeedRequest>, actor: &mut FeedActor) -> bool {
        tokio::select! {
            _ = sleep(RECONNECT_DELAY) => true,
            req = rx.recv() => {
                match req {
                    Some(r) => {
                        actor.handle_request(r);
                        true
                    }
                    None => false,
                }
            }
        }
    }

    fn handle_request(&mut self, req: FeedRequest) {
        match req {
            FeedRequest::Price(tx) => {
                let _ = tx.send(self.latest.clone());
            }
            FeedRequest::Diag(tx) => {
                let _ = tx.send(FeedDiag {
                    state: self.state.as_str(),
                    last_error: self.last_error.clone(),
                    last_event_at_ms: self.last_event_at_ms,
                    last_update_at_ms: self.latest.as_ref().map(|p| p.updated_at_ms),
                    feed_mode: self.feed_mode.clone(),
                    coin: self.coin.clone(),
                });
            }
        }
    }

    async fn send_subscription(
        socket: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        feed_mode: &str,
        coin: &str,
    ) -> anyhow::Result<()> {
        let payload = match feed_mode {
            "allMids" => json!({ "type": "allMids" }),
            "trades" => json!({ "type": "trades", "coin": coin }),
            other => json!({ "type": other, "coin": coin }),
        };
        socket.send(Message::Text(payload.to_string())).await?;
        Ok(())
    }

    fn handle_message(&mut self, text: &str) {
        self.last_event_at_ms = Some(now_ms());
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "price feed message was not JSON");
                return;
            }
        };

        let price = if self.feed_mode == "allMids" {
            value.get("mids").and_then(|m| m.get(&self.coin)).and_then(extract_number)
        } else if self.feed_mode == "trades" {
            value
                .as_array()
                .and_then(|arr| arr.last())
                .and_then(|last| last.get("px").or_else(|| last.get("price")))
                .and_then(extract_number)
        } else {
            None
        };

        if let Some(p) = price {
            if p.is_finite() {
                self.latest = Some(PriceSample { price: p, updated_at_ms: now_ms() });
            }
        }
    }
}

fn extract_number(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_number_handles_string_and_numeric() {
        assert_eq!(extract_number(&serde_json::json!(1.5)), Some(1.5));
        assert_eq!(extract_number(&serde_json::json!("2.5")), Some(2.5));
        assert_eq!(extract_number(&serde_json::json!("bogus")), None);
        assert_eq!(extract_number(&serde_json::json!(null)), None);
    }

    #[test]
    fn conn_state_as_str() {
        assert_eq!(ConnState::Connected.as_str(), "connected");
        assert_eq!(ConnState::Error.as_str(), "error");
    }
}
