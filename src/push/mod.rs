//! Persistent push (WebSocket) clients for trade and liquidation streams.
//!
//! One connection per venue, multiplexing every subscribed channel through
//! Binance's combined-stream envelope. A small connection-state enum plus a
//! truncated-exponential backoff drive reconnects; this pipeline's
//! subscription set is static per process, so no resync/endpoint-rotation
//! machinery is needed here — see DESIGN.md.

pub mod liquidation;
pub mod trade;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::models::{LiquidationEvent, StreamType, Trade, Venue};

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(60);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    AggTrade,
    Trade,
    ForceOrder,
}

impl ChannelKind {
    fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::AggTrade => "aggTrade",
            ChannelKind::Trade => "trade",
            ChannelKind::ForceOrder => "forceOrder",
        }
    }
}

pub enum PushEvent {
    Trade(Trade),
    Liquidation(LiquidationEvent),
}

enum CloseKind {
    Normal,
    Abnormal,
}

/// Reconnect backoff: `min(cap, base*2^(attempt-1) + jitter)`.
fn reconnect_backoff(attempt: u32) -> Duration {
    let base_ms = RECONNECT_BASE.as_millis() as f64 * 2f64.powi(attempt as i32 - 1);
    let jitter_ms = rand::thread_rng().gen_range(0.0..1000.0);
    let total_ms = (base_ms + jitter_ms).min(RECONNECT_CAP.as_millis() as f64);
    Duration::from_millis(total_ms as u64)
}

pub struct PushClient {
    venue: Venue,
    url: String,
    heartbeat_interval: Duration,
    state: Arc<Mutex<ConnectionState>>,
}

impl PushClient {
    pub fn new(venue: Venue, ws_base_url: &str, subscriptions: &[(String, ChannelKind)]) -> Self {
        Self::with_heartbeat_interval(venue, ws_base_url, subscriptions, DEFAULT_HEARTBEAT_INTERVAL)
    }

    pub fn with_heartbeat_interval(
        venue: Venue,
        ws_base_url: &str,
        subscriptions: &[(String, ChannelKind)],
        heartbeat_interval: Duration,
    ) -> Self {
        let channels: Vec<String> = subscriptions
            .iter()
            .map(|(symbol, kind)| format!("{}@{}", symbol.to_lowercase(), kind.as_str()))
            .collect();
        let url = format!("{}/stream?streams={}", ws_base_url, channels.join("/"));
        Self {
            venue,
            url,
            heartbeat_interval,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Run until `running` clears. Reconnects under backoff on abnormal
    /// close or transport error; stops cleanly (no reconnect) once
    /// `running` is false.
    pub async fn run(&self, running: Arc<AtomicBool>, tx: UnboundedSender<PushEvent>) {
        let mut attempt: u32 = 0;
        while running.load(Ordering::Relaxed) {
            *self.state.lock() = ConnectionState::Connecting;
            match self.connect_and_stream(&running, &tx).await {
                Ok(CloseKind::Normal) => {
                    attempt = 0;
                }
                Ok(CloseKind::Abnormal) => {
                    attempt += 1;
                }
                Err(e) => {
                    warn!(venue = %self.venue, error = %e, "push client transport error");
                    attempt += 1;
                }
            }
            *self.state.lock() = ConnectionState::Disconnected;
            if !running.load(Ordering::Relaxed) {
                break;
            }
            let backoff = reconnect_backoff(attempt.max(1));
            debug!(venue = %self.venue, attempt, ?backoff, "push client reconnecting");
            tokio::time::sleep(backoff).await;
        }
    }

    async fn connect_and_stream(
        &self,
        running: &Arc<AtomicBool>,
        tx: &UnboundedSender<PushEvent>,
    ) -> Result<CloseKind> {
        let (ws, _) = tokio_tungstenite::connect_async(&self.url)
            .await
            .with_context(|| format!("failed to connect to {}", self.url))?;
        let (mut write, mut read) = ws.split();
        *self.state.lock() = ConnectionState::Ready;
        info!(venue = %self.venue, "push client ready");

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.tick().await; // first tick fires immediately; consume it

        loop {
            if !running.load(Ordering::Relaxed) {
                let _ = write.send(Message::Close(None)).await;
                return Ok(CloseKind::Normal);
            }
            tokio::select! {
                _ = heartbeat.tick() => {
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        return Ok(CloseKind::Abnormal);
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_message(&text, tx),
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.map(|f| u16::from(f.code)).unwrap_or(1006);
                            return Ok(if code == 1000 { CloseKind::Normal } else { CloseKind::Abnormal });
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(venue = %self.venue, error = %e, "push client read error");
                            return Ok(CloseKind::Abnormal);
                        }
                        None => return Ok(CloseKind::Abnormal),
                    }
                }
            }
        }
    }

    fn handle_message(&self, text: &str, tx: &UnboundedSender<PushEvent>) {
        let Ok(outer) = serde_json::from_str::<Value>(text) else {
            return;
        };
        let data = outer.get("data").cloned().unwrap_or(outer);
        let Some(event_type) = data.get("e").and_then(Value::as_str) else {
            return;
        };

        match event_type {
            "aggTrade" | "trade" => {
                let Some(symbol) = data.get("s").and_then(Value::as_str) else {
                    return;
                };
                let stream_type = if event_type == "aggTrade" {
                    StreamType::AggTrade
                } else {
                    StreamType::Trade
                };
                if let Some(trade) = trade::decode_trade(symbol, self.venue, stream_type, &data) {
                    let _ = tx.send(PushEvent::Trade(trade));
                }
            }
            "forceOrder" => {
                let Some(symbol) = data
                    .get("o")
                    .and_then(|o| o.get("s"))
                    .and_then(Value::as_str)
                else {
                    return;
                };
                if let Some(liq) = liquidation::decode_liquidation(symbol, self.venue, &data) {
                    let _ = tx.send(PushEvent::Liquidation(liq));
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_strings_are_lowercased() {
        let client = PushClient::new(
            Venue::Spot,
            "wss://stream.binance.com:9443",
            &[("BTCUSDT".to_string(), ChannelKind::AggTrade)],
        );
        assert!(client.url.contains("btcusdt@aggTrade"));
    }

    #[test]
    fn initial_state_is_disconnected() {
        let client = PushClient::new(Venue::Spot, "wss://x", &[]);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert!(reconnect_backoff(1) < reconnect_backoff(1) + Duration::from_secs(1));
        assert!(reconnect_backoff(10) <= RECONNECT_CAP);
    }
}
