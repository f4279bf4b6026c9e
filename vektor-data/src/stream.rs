//! WebSocket ingress: a single multiplexed connection per exchange, with
//! exponential-backoff reconnect and resubscription, matching the state
//! machine:
//!
//! ```text
//! DISCONNECTED --run--> CONNECTING --open--> CONNECTED --close/error--> BACKOFF --timer--> CONNECTING
//!                                                                           |
//!                                                                           +--max attempts--> FAILED
//! ```

use crate::types::{Kline, MarketData};
use crate::orderbook::DepthUpdate;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};
use vektor_instrument::Symbol;

const BASE_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const PING_INTERVAL: Duration = Duration::from_secs(20);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff { attempt: u32 },
    Failed,
}

/// Events forwarded to the [`crate::ingester::DataIngester`] as they arrive.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Trade(MarketData),
    Depth(DepthUpdate),
    Kline { symbol: Symbol, bar: Kline },
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("websocket transport error: {0}")]
    Transport(String),
    #[error("exceeded {0} reconnect attempts")]
    ReconnectExhausted(u32),
}

/// Backoff schedule: `min(base * 2^attempt, cap)`.
pub fn next_backoff(attempt: u32) -> Duration {
    let scaled = BASE_BACKOFF.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    std::cmp::min(scaled, MAX_BACKOFF)
}

#[derive(Deserialize)]
struct ControlFrame {
    #[allow(dead_code)]
    id: Option<u64>,
    result: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct DataEnvelope {
    stream: String,
    data: serde_json::Value,
}

/// Classifies a raw inbound text frame, returning the normalized [`StreamEvent`]
/// when the frame carries data, or `None` for a control ack/ping frame.
///
/// Kept as a pure function (no I/O) so stream dispatch is unit-testable
/// without a live socket.
pub fn parse_frame(text: &str) -> Result<Option<StreamEvent>, StreamError> {
    if let Ok(control) = serde_json::from_str::<ControlFrame>(text) {
        if control.result.is_some() || control.error.is_some() {
            return Ok(None);
        }
    }
    let envelope: DataEnvelope = serde_json::from_str(text)
        .map_err(|e| StreamError::Transport(format!("malformed frame: {e}")))?;
    dispatch_by_stream_suffix(&envelope.stream, envelope.data)
}

fn dispatch_by_stream_suffix(
    stream: &str,
    data: serde_json::Value,
) -> Result<Option<StreamEvent>, StreamError> {
    let symbol = stream
        .split('@')
        .next()
        .map(|s| Symbol::new(s.to_uppercase()))
        .ok_or_else(|| StreamError::Transport("stream name missing symbol prefix".into()))?;

    if stream.contains("@depth") {
        let update = parse_depth(&symbol, &data)?;
        Ok(Some(StreamEvent::Depth(update)))
    } else if stream.contains("@kline") {
        let bar = parse_kline(&data)?;
        Ok(Some(StreamEvent::Kline { symbol, bar }))
    } else if stream.contains("@ticker") {
        let trade = parse_ticker(&symbol, &data)?;
        Ok(Some(StreamEvent::Trade(trade)))
    } else if stream.contains("@aggTrade") {
        let trade = parse_trade(&symbol, &data)?;
        Ok(Some(StreamEvent::Trade(trade)))
    } else {
        warn!(stream, "unrecognized stream suffix, dropping frame");
        Ok(None)
    }
}

fn parse_depth(
    symbol: &Symbol,
    data: &serde_json::Value,
) -> Result<DepthUpdate, StreamError> {
    use crate::types::OrderBookLevel;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    let parse_levels = |key: &str| -> Result<Vec<OrderBookLevel>, StreamError> {
        data[key]
            .as_array()
            .ok_or_else(|| StreamError::Transport(format!("missing {key}")))?
            .iter()
            .map(|lvl| {
                let price = Decimal::from_str(lvl[0].as_str().unwrap_or("0"))
                    .map_err(|e| StreamError::Transport(e.to_string()))?;
                let quantity = Decimal::from_str(lvl[1].as_str().unwrap_or("0"))
                    .map_err(|e| StreamError::Transport(e.to_string()))?;
                Ok(OrderBookLevel { price, quantity })
            })
            .collect()
    };

    Ok(DepthUpdate {
        symbol: symbol.clone(),
        timestamp: chrono::Utc::now(),
        first_update_id: data["U"].as_u64().unwrap_or(0),
        last_update_id: data["u"].as_u64().unwrap_or(0),
        bids: parse_levels("b")?,
        asks: parse_levels("a")?,
    })
}

fn parse_kline(data: &serde_json::Value) -> Result<Kline, StreamError> {
    use rust_decimal::Decimal;
    use std::str::FromStr;
    let k = &data["k"];
    let decimal_of = |key: &str| -> Result<Decimal, StreamError> {
        Decimal::from_str(k[key].as_str().unwrap_or("0"))
            .map_err(|e| StreamError::Transport(e.to_string()))
    };
    Ok(Kline {
        open_time: chrono::DateTime::from_timestamp_millis(k["t"].as_i64().unwrap_or(0))
            .unwrap_or_else(chrono::Utc::now),
        close_time: chrono::DateTime::from_timestamp_millis(k["T"].as_i64().unwrap_or(0))
            .unwrap_or_else(chrono::Utc::now),
        open: decimal_of("o")?,
        high: decimal_of("h")?,
        low: decimal_of("l")?,
        close: decimal_of("c")?,
        volume: decimal_of("v")?,
        trades: k["n"].as_u64().unwrap_or(0),
        is_closed: k["x"].as_bool().unwrap_or(false),
    })
}

fn parse_trade(symbol: &Symbol, data: &serde_json::Value) -> Result<MarketData, StreamError> {
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use vektor_instrument::Side;

    let price = Decimal::from_str(data["p"].as_str().unwrap_or("0"))
        .map_err(|e| StreamError::Transport(e.to_string()))?;
    let volume = Decimal::from_str(data["q"].as_str().unwrap_or("0"))
        .map_err(|e| StreamError::Transport(e.to_string()))?;
    // aggTrade: `m` true means the buyer is the maker, so the aggressor sold.
    let aggressor_side = if data["m"].as_bool().unwrap_or(false) {
        Side::Sell
    } else {
        Side::Buy
    };
    Ok(MarketData {
        symbol: symbol.clone(),
        timestamp: chrono::Utc::now(),
        price,
        volume,
        aggressor_side,
    })
}

/// `@ticker` (24hr rolling ticker) frames carry a different shape than
/// `@aggTrade`: price is the latest close (`c`), volume is the 24h base-asset
/// volume (`v`), and there is no per-trade maker flag — the aggressor is
/// inferred from the sign of the 24h price change (`p`).
fn parse_ticker(symbol: &Symbol, data: &serde_json::Value) -> Result<MarketData, StreamError> {
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use vektor_instrument::Side;

    let price = Decimal::from_str(data["c"].as_str().unwrap_or("0"))
        .map_err(|e| StreamError::Transport(e.to_string()))?;
    let volume = Decimal::from_str(data["v"].as_str().unwrap_or("0"))
        .map_err(|e| StreamError::Transport(e.to_string()))?;
    let price_change = Decimal::from_str(data["p"].as_str().unwrap_or("0"))
        .map_err(|e| StreamError::Transport(e.to_string()))?;
    let aggressor_side = if price_change.is_sign_negative() { Side::Sell } else { Side::Buy };
    Ok(MarketData {
        symbol: symbol.clone(),
        timestamp: chrono::Utc::now(),
        price,
        volume,
        aggressor_side,
    })
}

/// Drives one persistent, multiplexed connection for a set of streams, with
/// automatic reconnect/backoff and resubscription.
pub struct StreamClient {
    url: url::Url,
    streams: Vec<String>,
    state: ConnectionState,
    events_tx: mpsc::UnboundedSender<StreamEvent>,
}

impl StreamClient {
    pub fn new(url: url::Url, events_tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self {
            url,
            streams: Vec::new(),
            state: ConnectionState::Disconnected,
            events_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn subscribe(&mut self, streams: impl IntoIterator<Item = String>) {
        self.streams.extend(streams);
    }

    pub fn unsubscribe(&mut self, streams: &[String]) {
        self.streams.retain(|s| !streams.contains(s));
    }

    /// Runs the reconnect loop until `shutdown` resolves or `FAILED` is reached.
    pub async fn run(&mut self, mut shutdown: tokio::sync::oneshot::Receiver<()>) -> Result<(), StreamError> {
        let mut attempt = 0u32;
        loop {
            if shutdown.try_recv().is_ok() {
                self.state = ConnectionState::Disconnected;
                return Ok(());
            }

            self.state = ConnectionState::Connecting;
            match self.connect_and_pump(&mut shutdown).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(error = %err, attempt, "stream connection lost, backing off");
                    attempt += 1;
                    if attempt > MAX_RECONNECT_ATTEMPTS {
                        self.state = ConnectionState::Failed;
                        return Err(StreamError::ReconnectExhausted(MAX_RECONNECT_ATTEMPTS));
                    }
                    self.state = ConnectionState::Backoff { attempt };
                    tokio::time::sleep(next_backoff(attempt)).await;
                }
            }
        }
    }

    async fn connect_and_pump(
        &mut self,
        shutdown: &mut tokio::sync::oneshot::Receiver<()>,
    ) -> Result<(), StreamError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        self.state = ConnectionState::Connected;
        info!(streams = ?self.streams, "stream connected, resubscribing");

        let (mut write, mut read) = ws_stream.split();
        if !self.streams.is_empty() {
            let subscribe_msg = serde_json::json!({
                "method": "SUBSCRIBE",
                "params": self.streams,
                "id": 1,
            });
            write
                .send(Message::Text(subscribe_msg.to_string().into()))
                .await
                .map_err(|e| StreamError::Transport(e.to_string()))?;
        }

        let mut ping_interval = tokio::time::interval(PING_INTERVAL);
        loop {
            tokio::select! {
                _ = &mut *shutdown => return Ok(()),
                _ = ping_interval.tick() => {
                    write.send(Message::Ping(Vec::new().into())).await
                        .map_err(|e| StreamError::Transport(e.to_string()))?;
                }
                frame = tokio::time::timeout(PONG_TIMEOUT + PING_INTERVAL, read.next()) => {
                    let frame = frame.map_err(|_| StreamError::Transport("pong timeout".into()))?;
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match parse_frame(&text) {
                                Ok(Some(event)) => { let _ = self.events_tx.send(event); }
                                Ok(None) => {}
                                Err(e) => warn!(error = %e, "failed to parse frame"),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(StreamError::Transport("connection closed".into()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(StreamError::Transport(e.to_string())),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(next_backoff(0), Duration::from_secs(5));
        assert_eq!(next_backoff(1), Duration::from_secs(10));
        assert_eq!(next_backoff(2), Duration::from_secs(20));
        assert_eq!(next_backoff(10), MAX_BACKOFF);
    }

    #[test]
    fn parses_agg_trade_frame() {
        let frame = serde_json::json!({
            "stream": "btcusdt@aggTrade",
            "data": { "p": "100.5", "q": "2.0", "m": false }
        })
        .to_string();
        let event = parse_frame(&frame).unwrap().unwrap();
        match event {
            StreamEvent::Trade(md) => {
                assert_eq!(md.symbol, Symbol::new("BTCUSDT"));
                assert_eq!(md.aggressor_side, vektor_instrument::Side::Buy);
            }
            _ => panic!("expected trade event"),
        }
    }

    #[test]
    fn parses_ticker_frame_using_close_price_and_24h_volume() {
        let frame = serde_json::json!({
            "stream": "btcusdt@ticker",
            "data": { "c": "101.5", "v": "5000.0", "p": "-2.5", "P": "-2.4" }
        })
        .to_string();
        let event = parse_frame(&frame).unwrap().unwrap();
        match event {
            StreamEvent::Trade(md) => {
                assert_eq!(md.price, rust_decimal::Decimal::new(1015, 1));
                assert_eq!(md.volume, rust_decimal::Decimal::new(50000, 1));
                assert_eq!(md.aggressor_side, vektor_instrument::Side::Sell);
            }
            _ => panic!("expected trade event"),
        }
    }

    #[test]
    fn parses_depth_frame() {
        let frame = serde_json::json!({
            "stream": "ethusdt@depth",
            "data": { "U": 1, "u": 2, "b": [["99.0","1.0"]], "a": [["101.0","1.0"]] }
        })
        .to_string();
        let event = parse_frame(&frame).unwrap().unwrap();
        assert!(matches!(event, StreamEvent::Depth(_)));
    }

    #[test]
    fn control_frame_yields_no_event() {
        let frame = serde_json::json!({ "id": 1, "result": null }).to_string();
        assert!(parse_frame(&frame).unwrap().is_none());
    }
}
