// =============================================================================
// Binance USDⓈ-M perpetual futures adapter
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use super::shared::{PollWindow, SkipSet, StreamHealth};
use super::{Backoff, VenueAdapter, VenueEvent, VenueEventPayload, VenueEventSink};
use crate::types::{now_ts, TradeSide, Venue};

const CHUNK_SIZE: usize = 30;
const REST_WINDOW: usize = 50;

pub struct BinanceAdapter {
    client: reqwest::Client,
    health: StreamHealth,
    skip: SkipSet,
    poll_window: PollWindow,
}

impl BinanceAdapter {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            health: StreamHealth::new(),
            skip: SkipSet::new(),
            poll_window: PollWindow::new(),
        }
    }
}

impl Default for BinanceAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for BinanceAdapter {
    fn venue(&self) -> Venue {
        Venue::Binance
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
                    debug!(venue = "binance", symbol, error = %e, "funding/oi poll failed");
                    if e.to_string().contains("400") || e.to_string().contains("404") {
                        self.skip.mark(symbol);
                    }
                }
            }
        }
        out
    }

    async fn close(&self) {
        info!(venue = "binance", "adapter closing");
    }
}

impl BinanceAdapter {
    /// Fetches the most recent `limit` closed 1-minute klines, oldest-first,
    /// as `(close_time_sec, close_price)` pairs. Used to drive the BTC
    /// regime ring, which needs one real minute-close per slot.
    pub async fn fetch_btc_klines(&self, symbol: &str, limit: usize) -> Result<Vec<(f64, f64)>> {
        let url = format!(
            "https://fapi.binance.com/fapi/v1/klines?symbol={symbol}&interval=1m&limit={limit}"
        );
        let rows: Vec<serde_json::Value> = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET klines failed")?
            .json()
            .await
            .context("failed to parse klines response")?;

        let klines = rows
            .iter()
            .filter_map(|row| {
                let close_time_ms = row.get(6)?.as_f64()?;
                let close: f64 = row.get(4)?.as_str()?.parse().ok()?;
                Some((close_time_ms / 1000.0, close))
            })
            .collect();
        Ok(klines)
    }

    async fn fetch_funding_and_oi(&self, symbol: &str) -> Result<(Option<f64>, Option<f64>)> {
        let premium_url = format!(
            "https://fapi.binance.com/fapi/v1/premiumIndex?symbol={symbol}"
        );
        let resp: serde_json::Value = self
            .client
            .get(&premium_url)
            .send()
            .await
            .context("GET premiumIndex failed")?
            .json()
            .await
            .context("failed to parse premiumIndex response")?;
        let funding = resp["lastFundingRate"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok());

        let oi_url = format!("https://fapi.binance.com/fapi/v1/openInterest?symbol={symbol}");
        let resp: serde_json::Value = self
            .client
            .get(&oi_url)
            .send()
            .await
            .context("GET openInterest failed")?
            .json()
            .await
            .context("failed to parse openInterest response")?;
        let oi = resp["openInterest"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok());

        Ok((funding, oi))
    }
}

async fn run_chunk(symbols: Vec<String>, sink: VenueEventSink) -> Result<()> {
    let mut backoff = Backoff::new();
    loop {
        match run_chunk_once(&symbols, &sink).await {
            Ok(()) => {
                warn!(venue = "binance", "stream ended, reconnecting");
            }
            Err(e) => {
                warn!(venue = "binance", error = %e, "stream error, reconnecting");
            }
        }
        backoff.wait_and_grow().await;
    }
}

async fn run_chunk_once(symbols: &[String], sink: &VenueEventSink) -> Result<()> {
    let streams: Vec<String> = symbols
        .iter()
        .flat_map(|s| {
            let lower = s.to_lowercase();
            vec![
                format!("{lower}@depth20@100ms"),
                format!("{lower}@aggTrade"),
                format!("{lower}@markPrice@1s"),
            ]
        })
        .collect();
    let url = format!(
        "wss://fstream.binance.com/stream?streams={}",
        streams.join("/")
    );
    info!(venue = "binance", symbols = symbols.len(), "connecting");

    let (ws, _resp) = connect_async(&url).await.context("connect failed")?;
    let (_write, mut read) = ws.split();

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
    let stream = root.get("stream")?.as_str()?;
    let data = root.get("data")?;

    if stream.contains("@depth") {
        let symbol_local = data["s"].as_str()?.to_string();
        let bids = parse_levels(data.get("b")?);
        let asks = parse_levels(data.get("a")?);
        Some(VenueEvent {
            venue: Venue::Binance,
            symbol_local,
            timestamp: now_ts(),
            payload: VenueEventPayload::Book { bids, asks },
        })
    } else if stream.contains("@aggTrade") {
        let symbol_local = data["s"].as_str()?.to_string();
        let price: f64 = data["p"].as_str()?.parse().ok()?;
        let qty: f64 = data["q"].as_str()?.parse().ok()?;
        let is_buyer_maker = data["m"].as_bool().unwrap_or(false);
        let side = if is_buyer_maker {
            TradeSide::Sell
        } else {
            TradeSide::Buy
        };
        Some(VenueEvent {
            venue: Venue::Binance,
            symbol_local,
            timestamp: now_ts(),
            payload: VenueEventPayload::Trade { price, qty, side },
        })
    } else if stream.contains("@markPrice") {
        let symbol_local = data["s"].as_str()?.to_string();
        let price: f64 = data["p"].as_str()?.parse().ok()?;
        Some(VenueEvent {
            venue: Venue::Binance,
            symbol_local,
            timestamp: now_ts(),
            payload: VenueEventPayload::Mark { price },
        })
    } else {
        None
    }
}

fn parse_levels(arr: &serde_json::Value) -> Vec<(f64, f64)> {
    arr.as_array()
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
    fn parses_depth_message() {
        let text = r#"{"stream":"btcusdt@depth20@100ms","data":{"s":"BTCUSDT","b":[["100.0","1.5"]],"a":[["101.0","2.0"]]}}"#;
        let event = parse_message(text).expect("should parse");
        assert_eq!(event.symbol_local, "BTCUSDT");
        match event.payload {
            VenueEventPayload::Book { bids, asks } => {
                assert_eq!(bids, vec![(100.0, 1.5)]);
                assert_eq!(asks, vec![(101.0, 2.0)]);
            }
            _ => panic!("expected book payload"),
        }
    }

    #[test]
    fn parses_agg_trade_maker_side() {
        let text = r#"{"stream":"btcusdt@aggTrade","data":{"s":"BTCUSDT","p":"100.5","q":"0.2","m":true}}"#;
        let event = parse_message(text).expect("should parse");
        match event.payload {
            VenueEventPayload::Trade { price, qty, side } => {
                assert_eq!(price, 100.5);
                assert_eq!(qty, 0.2);
                assert_eq!(side, TradeSide::Sell);
            }
            _ => panic!("expected trade payload"),
        }
    }

    #[test]
    fn parses_mark_price() {
        let text = r#"{"stream":"btcusdt@markPrice@1s","data":{"s":"BTCUSDT","p":"100.25"}}"#;
        let event = parse_message(text).expect("should parse");
        match event.payload {
            VenueEventPayload::Mark { price } => assert_eq!(price, 100.25),
            _ => panic!("expected mark payload"),
        }
    }

    #[test]
    fn unknown_stream_returns_none() {
        let text = r#"{"stream":"btcusdt@unknown","data":{}}"#;
        assert!(parse_message(text).is_none());
    }

    #[test]
    fn parses_kline_row_close_and_close_time() {
        let row: serde_json::Value = serde_json::from_str(
            r#"[1700000000000,"100.0","101.0","99.0","100.5","1000.0",1700000059999,"0","0",0,"0","0"]"#,
        )
        .unwrap();
        let close_time_ms = row.get(6).unwrap().as_f64().unwrap();
        let close: f64 = row.get(4).unwrap().as_str().unwrap().parse().unwrap();
        assert_eq!(close, 100.5);
        assert_eq!(close_time_ms / 1000.0, 1700000059.999);
    }
}
