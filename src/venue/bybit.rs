// =============================================================================
// Bybit v5 linear perpetual adapter
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use super::shared::{PollWindow, SkipSet, StreamHealth};
use super::{Backoff, VenueAdapter, VenueEvent, VenueEventPayload, VenueEventSink};
use crate::types::{now_ts, TradeSide, Venue};

const CHUNK_SIZE: usize = 30;
const REST_WINDOW: usize = 50;
const WS_URL: &str = "wss://stream.bybit.com/v5/public/linear";

pub struct BybitAdapter {
    client: reqwest::Client,
    health: StreamHealth,
    skip: SkipSet,
    poll_window: PollWindow,
}

impl BybitAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client"),
            health: StreamHealth::new(),
            skip: SkipSet::new(),
            poll_window: PollWindow::new(),
        }
    }
}

impl Default for BybitAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for BybitAdapter {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }

    async fn run(&self, symbols_local: Vec<String>, sink: VenueEventSink) -> Result<()> {
        let mut handles = Vec::new();
        for chunk in symbols_local.chunks(CHUNK_SIZE) {
            let chunk = chunk.to_vec();
            let sink = sink.clone();
            handles.push(tokio::spawn(run_chunk(chunk, sink)));
        }
        for h in handles {
            let _ = h.await;
        }
        Ok(())
    }

    fn staleness_check(&self) -> std::collections::HashMap<String, f64> {
        self.health.stale()
    }

    async fn poll_funding_and_oi(
        &self,
        symbols_local: &[String],
    ) -> Vec<(String, Option<f64>, Option<f64>)> {
        let all: Vec<String> = symbols_local
            .iter()
            .filter(|s| !self.skip.is_skipped(s))
            .cloned()
            .collect();
        let window = self.poll_window.next_slice(&all, REST_WINDOW);
        let mut out = Vec::with_capacity(window.len());
        for symbol in window {
            match self.fetch_funding_and_oi(symbol).await {
                Ok((funding, oi)) => out.push((symbol.to_string(), funding, oi)),
                Err(e) => {
                    debug!(venue = "bybit", symbol, error = %e, "funding/oi poll failed");
                    if e.to_string().contains("400") {
                        self.skip.mark(symbol);
                    }
                }
            }
        }
        out
    }

    async fn close(&self) {
        info!(venue = "bybit", "adapter closing");
    }
}

impl BybitAdapter {
    async fn fetch_funding_and_oi(&self, symbol: &str) -> Result<(Option<f64>, Option<f64>)> {
        let url = format!(
            "https://api.bybit.com/v5/market/tickers?category=linear&symbol={symbol}"
        );
        let resp: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET tickers failed")?
            .json()
            .await
            .context("failed to parse tickers response")?;
        let entry = resp["result"]["list"].get(0);
        let funding = entry
            .and_then(|e| e["fundingRate"].as_str())
            .and_then(|s| s.parse::<f64>().ok());
        let oi = entry
            .and_then(|e| e["openInterest"].as_str())
            .and_then(|s| s.parse::<f64>().ok());
        Ok((funding, oi))
    }
}

async fn run_chunk(symbols: Vec<String>, sink: VenueEventSink) -> Result<()> {
    let mut backoff = Backoff::new();
    loop {
        match run_chunk_once(&symbols, &sink).await {
            Ok(()) => warn!(venue = "bybit", "stream ended, reconnecting"),
            Err(e) => warn!(venue = "bybit", error = %e, "stream error, reconnecting"),
        }
        backoff.wait_and_grow().await;
    }
}

async fn run_chunk_once(symbols: &[String], sink: &VenueEventSink) -> Result<()> {
    info!(venue = "bybit", symbols = symbols.len(), "connecting");
    let (ws, _resp) = connect_async(WS_URL).await.context("connect failed")?;
    let (mut write, mut read) = ws.split();

    let mut args = Vec::new();
    for s in symbols {
        args.push(format!("orderbook.50.{s}"));
        args.push(format!("publicTrade.{s}"));
        args.push(format!("tickers.{s}"));
    }
    let sub = serde_json::json!({ "op": "subscribe", "args": args });
    write
        .send(tokio_tungstenite::tungstenite::Message::Text(
            sub.to_string(),
        ))
        .await
        .context("subscribe send failed")?;

    while let Some(msg) = read.next().await {
        let msg = msg.context("ws read error")?;
        if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
            for event in parse_message(&text) {
                sink.send(event).ok();
            }
        }
    }
    Ok(())
}

fn parse_message(text: &str) -> Vec<VenueEvent> {
    let Ok(root) = serde_json::from_str::<serde_json::Value>(text) else {
        return Vec::new();
    };
    let Some(topic) = root.get("topic").and_then(|t| t.as_str()) else {
        return Vec::new();
    };
    let data = root.get("data");

    if let Some(symbol_local) = topic.strip_prefix("orderbook.50.") {
        let Some(data) = data else { return Vec::new() };
        let bids = parse_levels(data.get("b"));
        let asks = parse_levels(data.get("a"));
        if bids.is_empty() && asks.is_empty() {
            return Vec::new();
        }
        return vec![VenueEvent {
            venue: Venue::Bybit,
            symbol_local: symbol_local.to_string(),
            timestamp: now_ts(),
            payload: VenueEventPayload::Book { bids, asks },
        }];
    }

    if let Some(symbol_local) = topic.strip_prefix("publicTrade.") {
        let Some(arr) = data.and_then(|d| d.as_array()) else {
            return Vec::new();
        };
        return arr
            .iter()
            .filter_map(|t| {
                let price: f64 = t["p"].as_str()?.parse().ok()?;
                let qty: f64 = t["v"].as_str()?.parse().ok()?;
                let side = match t["S"].as_str()? {
                    "Buy" => TradeSide::Buy,
                    _ => TradeSide::Sell,
                };
                Some(VenueEvent {
                    venue: Venue::Bybit,
                    symbol_local: symbol_local.to_string(),
                    timestamp: now_ts(),
                    payload: VenueEventPayload::Trade { price, qty, side },
                })
            })
            .collect();
    }

    if let Some(symbol_local) = topic.strip_prefix("tickers.") {
        let Some(data) = data else { return Vec::new() };
        let Some(price) = data["markPrice"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
        else {
            return Vec::new();
        };
        return vec![VenueEvent {
            venue: Venue::Bybit,
            symbol_local: symbol_local.to_string(),
            timestamp: now_ts(),
            payload: VenueEventPayload::Mark { price },
        }];
    }

    Vec::new()
}

fn parse_levels(arr: Option<&serde_json::Value>) -> Vec<(f64, f64)> {
    arr.and_then(|a| a.as_array())
        .map(|levels| {
            levels
                .iter()
                .filter_map(|lvl| {
                    let p: f64 = lvl.get(0)?.as_str()?.parse().ok()?;
                    let q: f64 = lvl.get(1)?.as_str()?.parse().ok()?;
                    Some((p, q))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_orderbook_topic() {
        let text = r#"{"topic":"orderbook.50.BTCUSDT","data":{"b":[["100.0","1.0"]],"a":[["101.0","2.0"]]}}"#;
        let events = parse_message(text);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].symbol_local, "BTCUSDT");
    }

    #[test]
    fn parses_public_trade_topic() {
        let text = r#"{"topic":"publicTrade.ETHUSDT","data":[{"p":"10.5","v":"2.0","S":"Sell"}]}"#;
        let events = parse_message(text);
        assert_eq!(events.len(), 1);
        match &events[0].payload {
            VenueEventPayload::Trade { price, qty, side } => {
                assert_eq!(*price, 10.5);
                assert_eq!(*qty, 2.0);
                assert_eq!(*side, TradeSide::Sell);
            }
            _ => panic!("expected trade"),
        }
    }

    #[test]
    fn parses_tickers_topic_mark_price() {
        let text = r#"{"topic":"tickers.BTCUSDT","data":{"markPrice":"99.9"}}"#;
        let events = parse_message(text);
        assert_eq!(events.len(), 1);
        match events[0].payload {
            VenueEventPayload::Mark { price } => assert_eq!(price, 99.9),
            _ => panic!("expected mark"),
        }
    }
}
