// =============================================================================
// Venue Adapter — contract shared by every exchange connector
// =============================================================================

pub mod binance;
pub mod bybit;
pub mod lbank;
pub mod mexc;
pub mod shared;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::{TradeSide, Venue};

/// One normalized event emitted by an adapter onto its sink. Numeric fields
/// are always pre-parsed floats; adapters never forward raw payload strings.
#[derive(Debug, Clone)]
pub struct VenueEvent {
    pub venue: Venue,
    pub symbol_local: String,
    pub timestamp: f64,
    pub payload: VenueEventPayload,
}

#[derive(Debug, Clone)]
pub enum VenueEventPayload {
    Book {
        bids: Vec<(f64, f64)>,
        asks: Vec<(f64, f64)>,
    },
    Trade {
        price: f64,
        qty: f64,
        side: TradeSide,
    },
    Mark {
        price: f64,
    },
}

pub type VenueEventSink = mpsc::UnboundedSender<VenueEvent>;

/// One instance per venue. Adapters own their WS connections and per-stream
/// staleness bookkeeping exclusively; nothing outside the adapter mutates
/// that state.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> Venue;

    /// Runs until cancelled or fatally erroring; reconnects internally with
    /// exponential backoff (1s -> 30s, reset on a successfully parsed
    /// message).
    async fn run(&self, symbols_local: Vec<String>, sink: VenueEventSink) -> Result<()>;

    /// Streams whose last message is older than 60 s, keyed by stream id.
    fn staleness_check(&self) -> HashMap<String, f64>;

    /// REST poll for funding rate / open interest for the given symbols.
    /// Returns `(symbol_local, funding_rate, oi_value)` triples; either
    /// numeric field may be absent if the venue has no equivalent.
    async fn poll_funding_and_oi(&self, symbols_local: &[String]) -> Vec<(String, Option<f64>, Option<f64>)>;

    async fn close(&self);
}

/// Reconnect backoff shared by every adapter's `run()` loop: starts at 1s,
/// doubles, caps at 30s, resets to 1s after the next message is parsed.
pub struct Backoff {
    current_sec: u64,
}

impl Backoff {
    const MIN_SEC: u64 = 1;
    const MAX_SEC: u64 = 30;

    pub fn new() -> Self {
        Self {
            current_sec: Self::MIN_SEC,
        }
    }

    pub fn reset(&mut self) {
        self.current_sec = Self::MIN_SEC;
    }

    pub async fn wait_and_grow(&mut self) {
        tokio::time::sleep(std::time::Duration::from_secs(self.current_sec)).await;
        self.current_sec = (self.current_sec * 2).min(Self::MAX_SEC);
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::new();
        assert_eq!(b.current_sec, 1);
        b.current_sec = (b.current_sec * 2).min(Backoff::MAX_SEC);
        assert_eq!(b.current_sec, 2);
        for _ in 0..10 {
            b.current_sec = (b.current_sec * 2).min(Backoff::MAX_SEC);
        }
        assert_eq!(b.current_sec, 30);
    }

    #[test]
    fn backoff_resets_to_min() {
        let mut b = Backoff::new();
        b.current_sec = 16;
        b.reset();
        assert_eq!(b.current_sec, 1);
    }
}
