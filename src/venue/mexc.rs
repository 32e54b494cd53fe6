// =============================================================================
// MEXC USDT-margined contract adapter
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
const WS_URL: &str = "wss://contract.mexc.com/edge";

pub struct MexcAdapter {
    client: reqwest::Client,
    health: StreamHealth,
    skip: SkipSet,
    poll_window: PollWindow,
}

impl MexcAdapter {
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

impl Default for MexcAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for MexcAdapter {
    fn venue(&self) -> Venue {
        Venue::Mexc
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
                    debug!(venue = "mexc", symbol, error = %e, "funding/oi poll failed");
                    if e.to_string().contains("400") {
                        self.skip.mark(symbol);
                    }
                }
            }
        }
        out
    }

    async fn close(&self) {
        info!(venue = "mexc", "adapter closing");
    }
}

impl MexcAdapter {
    async fn fetch_funding_and_oi(&self, symbol: &str) -> Result<(Option<f64>, Option<f64>)> {
        let funding_url = format!("https://contract.mexc.com/api/v1/contract/funding_rate/{symbol}");
        let resp: serde_json::Value = self
            .client
            .get(&funding_url)
            .send()
            .await
            .context("GET funding_rate failed")?
            .json()
            .await
            .context("failed to parse funding_rate response")?;
        let funding = resp["data"]["fundingRate"].as_f64();

        let oi_url = format!("https://contract.mexc.com/api/v1/contract/open_interest/{symbol}");
        let resp: serde_json::Value = self
            .client
            .get(&oi_url)
            .send()
            .await
            .context("GET open_interest failed")?
            .json()
            .await
            .context("failed to parse open_interest response")?;
        let oi = resp["data"]["holdVol"].as_f64();

        Ok((funding, oi))
    }
}

async fn run_chunk(symbols: Vec<String>, sink: VenueEventSink) -> Result<()> {
    let mut backoff = Backoff::new();
    loop {
        match run_chunk_once(&symbols, &sink).await {
            Ok(()) => warn!(venue = "mexc", "stream ended, reconnecting"),
            Err(e) => warn!(venue = "mexc", error = %e, "stream error, reconnecting"),
        }
        backoff.wait_and_grow().await;
    }
}

async fn run_chunk_once(symbols: &[String], sink: &VenueEventSink) -> Result<()> {
    info!(venue = "mexc", symbols = symbols.len(), "connecting");
    let (ws, _resp) = connect_async(WS_URL).await.context("connect failed")?;
    let (mut write, mut read) = ws.split();

    for s in symbols {
        for method in ["sub.depth", "sub.deal", "sub.ticker"] {
            let sub = serde_json::json!({ "method": method, "param": { "symbol": s } });
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
    let channel = root.get("channel")?.as_str()?;
    let data = root.get("data")?;

    if channel == "push.depth" {
        let symbol_local = data["symbol"].as_str().or_else(|| root["symbol"].as_str())?.to_string();
        let bids = parse_levels(data.get("bids"));
        let asks = parse_levels(data.get("asks"));
        Some(VenueEvent {
            venue: Venue::Mexc,
            symbol_local,
            timestamp: now_ts(),
            payload: VenueEventPayload::Book { bids, asks },
        })
    } else if channel == "push.deal" {
        let symbol_local = root["symbol"].as_str()?.to_string();
        let arr = data.as_array()?;
        let t = arr.first()?;
        let price = t["p"].as_f64()?;
        let qty = t["v"].as_f64()?;
        let side = if t["T"].as_i64().unwrap_or(1) == 1 {
            TradeSide::Buy
        } else {
            TradeSide::Sell
        };
        Some(VenueEvent {
            venue: Venue::Mexc,
            symbol_local,
            timestamp: now_ts(),
            payload: VenueEventPayload::Trade { price, qty, side },
        })
    } else if channel == "push.ticker" {
        let symbol_local = data["symbol"].as_str().or_else(|| root["symbol"].as_str())?.to_string();
        let price = data["fairPrice"].as_f64().or_else(|| data["lastPrice"].as_f64())?;
        Some(VenueEvent {
            venue: Venue::Mexc,
            symbol_local,
            timestamp: now_ts(),
            payload: VenueEventPayload::Mark { price },
        })
    } else {
        None
    }
}

fn parse_levels(arr: Option<&serde_json::Value>) -> Vec<(f64, f64)> {
    arr.and_then(|a| a.as_array())
        .map(|levels| {
            levels
                .iter()
                .filter_map(|lvl| {
                    let p = lvl.get(0)?.as_f64()?;
                    let q = lvl.get(1)?.as_f64()?;
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
    fn parses_depth_push() {
        let text = r#"{"channel":"push.depth","symbol":"BTC_USDT","data":{"bids":[[100.0,1.0]],"asks":[[101.0,2.0]]}}"#;
        let event = parse_message(text).expect("should parse");
        match event.payload {
            VenueEventPayload::Book { bids, asks } => {
                assert_eq!(bids, vec![(100.0, 1.0)]);
                assert_eq!(asks, vec![(101.0, 2.0)]);
            }
            _ => panic!("expected book"),
        }
    }

    #[test]
    fn parses_deal_push() {
        let text = r#"{"channel":"push.deal","symbol":"BTC_USDT","data":[{"p":99.5,"v":0.3,"T":2}]}"#;
        let event = parse_message(text).expect("should parse");
        match event.payload {
            VenueEventPayload::Trade { price, qty, side } => {
                assert_eq!(price, 99.5);
                assert_eq!(qty, 0.3);
                assert_eq!(side, TradeSide::Sell);
            }
            _ => panic!("expected trade"),
        }
    }

    #[test]
    fn parses_ticker_push_mark() {
        let text = r#"{"channel":"push.ticker","symbol":"BTC_USDT","data":{"fairPrice":101.2}}"#;
        let event = parse_message(text).expect("should parse");
        match event.payload {
            VenueEventPayload::Mark { price } => assert_eq!(price, 101.2),
            _ => panic!("expected mark"),
        }
    }
}
