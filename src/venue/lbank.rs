// =============================================================================
// LBank perpetual contract adapter
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
const WS_URL: &str = "wss://www.lbkex.net/ws/V2/";

pub struct LbankAdapter {
    client: reqwest::Client,
    health: StreamHealth,
    skip: SkipSet,
    poll_window: PollWindow,
}

impl LbankAdapter {
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

impl Default for LbankAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for LbankAdapter {
    fn venue(&self) -> Venue {
        Venue::Lbank
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
        // LBank's public futures API exposes funding rate but no OI
        // endpoint comparable to the other three venues.
        let all: Vec<String> = symbols_local
            .iter()
            .filter(|s| !self.skip.is_skipped(s))
            .cloned()
            .collect();
        let window = self.poll_window.next_slice(&all, REST_WINDOW);
        let mut out = Vec::with_capacity(window.len());
        for symbol in window {
            match self.fetch_funding(symbol).await {
                Ok(funding) => out.push((symbol.to_string(), funding, None)),
                Err(e) => {
                    debug!(venue = "lbank", symbol, error = %e, "funding poll failed");
                    if e.to_string().contains("400") {
                        self.skip.mark(symbol);
                    }
                }
            }
        }
        out
    }

    async fn close(&self) {
        info!(venue = "lbank", "adapter closing");
    }
}

impl LbankAdapter {
    async fn fetch_funding(&self, symbol: &str) -> Result<Option<f64>> {
        let url = format!(
            "https://lbkperpfutures.lbank.com/cfd/openApi/v1/pub/fundingRate?symbol={symbol}"
        );
        let resp: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET fundingRate failed")?
            .json()
            .await
            .context("failed to parse fundingRate response")?;
        Ok(resp["data"]["fundingRate"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .or_else(|| resp["data"]["fundingRate"].as_f64()))
    }
}

async fn run_chunk(symbols: Vec<String>, sink: VenueEventSink) -> Result<()> {
    let mut backoff = Backoff::new();
    loop {
        match run_chunk_once(&symbols, &sink).await {
            Ok(()) => warn!(venue = "lbank", "stream ended, reconnecting"),
            Err(e) => warn!(venue = "lbank", error = %e, "stream error, reconnecting"),
        }
        backoff.wait_and_grow().await;
    }
}

async fn run_chunk_once(symbols: &[String], sink: &VenueEventSink) -> Result<()> {
    info!(venue = "lbank", symbols = symbols.len(), "connecting");
    let (ws, _resp) = connect_async(WS_URL).await.context("connect failed")?;
    let (mut write, mut read) = ws.split();

    for s in symbols {
        for subscribe in ["depth", "trade", "tick"] {
            let sub = serde_json::json!({
                "action": "subscribe",
                "subscribe": subscribe,
                "pair": s,
                "depth": "50"
            });
            write
                .send(tokio_tungstenite::tungstenite::Message::Text(
                    sub.to_string(),
                ))
                .await
                .context("subscribe send failed")?;
        }
    }

    while let Some(msg) = read.next().await {
        let msg = msg.context("ws read error")?;
        if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
            if let Some(event) = parse_message(&text) {
                sink.send(event).ok();
            }
        }
    }
    Ok(())
}

fn parse_message(text: &str) -> Option<VenueEvent> {
    let root: serde_json::Value = serde_json::from_str(text).ok()?;
    let kind = root.get("type")?.as_str()?;
    let symbol_local = root.get("pair")?.as_str()?.to_string();

    match kind {
        "depth" => {
            let depth = root.get("depth")?;
            let bids = parse_levels(depth.get("bids"));
            let asks = parse_levels(depth.get("asks"));
            Some(VenueEvent {
                venue: Venue::Lbank,
                symbol_local,
                timestamp: now_ts(),
                payload: VenueEventPayload::Book { bids, asks },
            })
        }
        "trade" => {
            let trade = root.get("trade")?;
            let price: f64 = trade["price"].as_str()?.parse().ok()?;
            let qty: f64 = trade["volume"].as_str()?.parse().ok()?;
            let side = match trade["direction"].as_str()? {
                "buy" => TradeSide::Buy,
                _ => TradeSide::Sell,
            };
            Some(VenueEvent {
                venue: Venue::Lbank,
                symbol_local,
                timestamp: now_ts(),
                payload: VenueEventPayload::Trade { price, qty, side },
            })
        }
        "tick" => {
            let tick = root.get("tick")?;
            let price: f64 = tick["latest"].as_str()?.parse().ok()?;
            Some(VenueEvent {
                venue: Venue::Lbank,
                symbol_local,
                timestamp: now_ts(),
                payload: VenueEventPayload::Mark { price },
            })
        }
        _ => None,
    }
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
    fn parses_depth_frame() {
        let text = r#"{"type":"depth","pair":"btc_usdt","depth":{"bids":[["100.0","1.0"]],"asks":[["101.0","2.0"]]}}"#;
        let event = parse_message(text).expect("should parse");
        assert_eq!(event.symbol_local, "btc_usdt");
        match event.payload {
            VenueEventPayload::Book { bids, asks } => {
                assert_eq!(bids, vec![(100.0, 1.0)]);
                assert_eq!(asks, vec![(101.0, 2.0)]);
            }
            _ => panic!("expected book"),
        }
    }

    #[test]
    fn parses_trade_frame() {
        let text = r#"{"type":"trade","pair":"eth_usdt","trade":{"price":"10.5","volume":"3.0","direction":"sell"}}"#;
        let event = parse_message(text).expect("should parse");
        match event.payload {
            VenueEventPayload::Trade { price, qty, side } => {
                assert_eq!(price, 10.5);
                assert_eq!(qty, 3.0);
                assert_eq!(side, TradeSide::Sell);
            }
            _ => panic!("expected trade"),
        }
    }

    #[test]
    fn parses_tick_frame_mark_price() {
        let text = r#"{"type":"tick","pair":"btc_usdt","tick":{"latest":"99.9"}}"#;
        let event = parse_message(text).expect("should parse");
        match event.payload {
            VenueEventPayload::Mark { price } => assert_eq!(price, 99.9),
            _ => panic!("expected mark"),
        }
    }
}
