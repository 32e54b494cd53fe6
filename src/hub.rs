// =============================================================================
// Data Hub — multi-venue fan-in, cross-venue averaging, unified-tick emission
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::symbol_universe::SymbolUniverse;
use crate::types::{now_ts, CanonicalSymbol, TradeSide, Venue};
use crate::venue::{VenueAdapter, VenueEventPayload};

const PER_VENUE_FRESH_SEC: f64 = 180.0;
const FUNDING_OI_FRESH_SEC: f64 = 7200.0;
const TRADES_CAP: usize = 4000;
const OI_CAP: usize = 2880;
const QUEUE_CAP: usize = 10_000;

#[derive(Debug, Clone, Default)]
pub struct PerVenueMetric {
    pub price: Option<f64>,
    pub spread: Option<f64>,
    pub bid_total: Option<f64>,
    pub ask_total: Option<f64>,
    pub ts: f64,
}

#[derive(Debug, Clone)]
pub struct TradePrint {
    pub ts: f64,
    pub price: f64,
    pub qty: f64,
    pub side: TradeSide,
}

#[derive(Debug, Clone, Default)]
pub struct UnifiedTick {
    pub symbol: CanonicalSymbol,
    pub timestamp: f64,
    pub price: Option<f64>,
    pub mark: Option<f64>,
    pub funding: Option<f64>,
    pub oi: Option<f64>,
    pub spread: Option<f64>,
    pub bid_total: Option<f64>,
    pub ask_total: Option<f64>,
    pub imbalance: Option<f64>,
}

pub struct DataHub {
    universe: Arc<SymbolUniverse>,
    per_venue_metric: Mutex<HashMap<(Venue, CanonicalSymbol), PerVenueMetric>>,
    trades: Mutex<HashMap<(Venue, CanonicalSymbol), VecDeque<TradePrint>>>,
    funding_rates: Mutex<HashMap<(Venue, CanonicalSymbol), (f64, f64)>>,
    open_interest: Mutex<HashMap<(Venue, CanonicalSymbol), VecDeque<(f64, f64)>>>,
    queue: Mutex<VecDeque<UnifiedTick>>,
    queue_notify: Notify,
}

impl DataHub {
    pub fn new(universe: Arc<SymbolUniverse>) -> Self {
        Self {
            universe,
            per_venue_metric: Mutex::new(HashMap::new()),
            trades: Mutex::new(HashMap::new()),
            funding_rates: Mutex::new(HashMap::new()),
            open_interest: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::with_capacity(QUEUE_CAP)),
            queue_notify: Notify::new(),
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Blocks until a tick is available, then pops the oldest.
    pub async fn recv(&self) -> UnifiedTick {
        loop {
            if let Some(tick) = self.queue.lock().pop_front() {
                return tick;
            }
            self.queue_notify.notified().await;
        }
    }

    fn canonicalize(&self, venue: Venue, symbol_local: &str) -> Option<CanonicalSymbol> {
        let canonical = self.universe.to_canonical(venue, symbol_local);
        if self.universe.contains(&canonical) {
            Some(canonical)
        } else {
            None
        }
    }

    fn validate_ts(&self, ts: f64) -> bool {
        (ts - now_ts()).abs() <= 300.0
    }

    pub fn on_venue_event(&self, venue: Venue, symbol_local: &str, ts: f64, payload: VenueEventPayload) {
        let Some(symbol) = self.canonicalize(venue, symbol_local) else {
            return;
        };
        if !self.validate_ts(ts) {
            return;
        }
        match payload {
            VenueEventPayload::Book { bids, asks } => self.on_book(venue, &symbol, ts, &bids, &asks),
            VenueEventPayload::Trade { price, qty, side } => {
                self.on_trade(venue, &symbol, ts, price, qty, side)
            }
            VenueEventPayload::Mark { price } => self.on_mark(venue, &symbol, ts, price),
        }
        self.emit_unified(&symbol, ts);
    }

    fn on_book(
        &self,
        venue: Venue,
        symbol: &CanonicalSymbol,
        ts: f64,
        bids: &[(f64, f64)],
        asks: &[(f64, f64)],
    ) {
        let bid_total: f64 = bids.iter().map(|(_, q)| q).sum();
        let ask_total: f64 = asks.iter().map(|(_, q)| q).sum();
        let best_bid = bids.first().map(|(p, _)| *p).unwrap_or(0.0);
        let best_ask = asks.first().map(|(p, _)| *p).unwrap_or(0.0);

        let mut metrics = self.per_venue_metric.lock();
        let entry = metrics
            .entry((venue, symbol.clone()))
            .or_insert_with(PerVenueMetric::default);
        entry.bid_total = Some(bid_total);
        entry.ask_total = Some(ask_total);
        entry.spread = Some(best_ask - best_bid);
        if best_ask >= best_bid && best_bid > 0.0 {
            entry.price = Some((best_bid + best_ask) / 2.0);
        }
        entry.ts = ts;
    }

    fn on_trade(&self, venue: Venue, symbol: &CanonicalSymbol, ts: f64, price: f64, qty: f64, side: TradeSide) {
        if price > 0.0 {
            let mut metrics = self.per_venue_metric.lock();
            let entry = metrics
                .entry((venue, symbol.clone()))
                .or_insert_with(PerVenueMetric::default);
            entry.price = Some(price);
            entry.ts = ts;
        }
        let mut trades = self.trades.lock();
        let deque = trades.entry((venue, symbol.clone())).or_default();
        deque.push_back(TradePrint { ts, price, qty, side });
        while deque.len() > TRADES_CAP {
            deque.pop_front();
        }
    }

    fn on_mark(&self, venue: Venue, symbol: &CanonicalSymbol, ts: f64, price: f64) {
        if price > 0.0 {
            let mut metrics = self.per_venue_metric.lock();
            let entry = metrics
                .entry((venue, symbol.clone()))
                .or_insert_with(PerVenueMetric::default);
            entry.price = Some(price);
            entry.ts = ts;
        }
    }

    pub fn update_funding(&self, venue: Venue, symbol: &CanonicalSymbol, ts: f64, rate: f64) {
        self.funding_rates.lock().insert((venue, symbol.clone()), (ts, rate));
        self.emit_unified(symbol, ts);
    }

    pub fn update_oi(&self, venue: Venue, symbol: &CanonicalSymbol, ts: f64, value: f64) {
        let mut oi = self.open_interest.lock();
        let deque = oi.entry((venue, symbol.clone())).or_default();
        deque.push_back((ts, value));
        while deque.len() > OI_CAP {
            deque.pop_front();
        }
        drop(oi);
        self.emit_unified(symbol, ts);
    }

    /// Cross-venue mean of fresh per-venue metrics, funding, and OI, enqueued
    /// lossy-newest-wins on overflow.
    pub fn emit_unified(&self, symbol: &CanonicalSymbol, ts: f64) {
        let (price, spread, bid_total, ask_total, imbalance) = {
            let metrics = self.per_venue_metric.lock();
            let fresh: Vec<&PerVenueMetric> = Venue::ALL
                .iter()
                .filter_map(|v| metrics.get(&(*v, symbol.clone())))
                .filter(|m| ts - m.ts <= PER_VENUE_FRESH_SEC)
                .collect();

            let price = mean_of(fresh.iter().filter_map(|m| m.price));
            let spread = mean_of(fresh.iter().filter_map(|m| m.spread));
            let bid_total = mean_of(fresh.iter().filter_map(|m| m.bid_total));
            let ask_total = mean_of(fresh.iter().filter_map(|m| m.ask_total));
            let imbalance = mean_of(fresh.iter().filter_map(|m| {
                match (m.ask_total, m.bid_total) {
                    (Some(a), Some(b)) if a + b > 0.0 => Some((a - b) / (a + b)),
                    _ => None,
                }
            }));
            (price, spread, bid_total, ask_total, imbalance)
        };

        let funding = {
            let rates = self.funding_rates.lock();
            mean_of(Venue::ALL.iter().filter_map(|v| {
                rates
                    .get(&(*v, symbol.clone()))
                    .filter(|(fts, _)| ts - fts <= FUNDING_OI_FRESH_SEC)
                    .map(|(_, rate)| *rate)
            }))
        };

        let oi = {
            let ois = self.open_interest.lock();
            mean_of(Venue::ALL.iter().filter_map(|v| {
                ois.get(&(*v, symbol.clone())).and_then(|deque| {
                    deque
                        .back()
                        .filter(|(ots, _)| ts - ots <= FUNDING_OI_FRESH_SEC)
                        .map(|(_, val)| *val)
                })
            }))
        };

        if price.is_none() && funding.is_none() && oi.is_none() {
            return;
        }

        let tick = UnifiedTick {
            symbol: symbol.clone(),
            timestamp: ts,
            price,
            mark: price,
            funding,
            oi,
            spread,
            bid_total,
            ask_total,
            imbalance,
        };

        let mut queue = self.queue.lock();
        if queue.len() >= QUEUE_CAP {
            queue.pop_front();
        }
        queue.push_back(tick);
        drop(queue);
        self.queue_notify.notify_one();
    }

    /// Every 60s: poll each venue's funding/OI for a windowed slice of its
    /// observed symbols.
    pub async fn funding_oi_tick(&self, adapters: &[(Venue, Arc<dyn VenueAdapter>)], observed: &HashMap<Venue, Vec<String>>) {
        for (venue, adapter) in adapters {
            let symbols = observed.get(venue).cloned().unwrap_or_default();
            if symbols.is_empty() {
                continue;
            }
            let results = adapter.poll_funding_and_oi(&symbols).await;
            let ts = now_ts();
            for (symbol_local, funding, oi) in results {
                let Some(symbol) = self.canonicalize(*venue, &symbol_local) else {
                    continue;
                };
                if let Some(rate) = funding {
                    self.update_funding(*venue, &symbol, ts, rate);
                }
                if let Some(value) = oi {
                    self.update_oi(*venue, &symbol, ts, value);
                }
            }
        }
    }

    /// Every 60s: inspect every adapter's staleness map and log a warning
    /// for affected streams.
    pub fn staleness_tick(&self, adapters: &[(Venue, Arc<dyn VenueAdapter>)]) {
        for (venue, adapter) in adapters {
            let stale = adapter.staleness_check();
            for (stream, age) in stale {
                warn!(venue = %venue, stream = %stream, age_s = age, "stream stale");
            }
        }
        debug!("staleness check complete");
    }
}

fn mean_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> DataHub {
        let universe = Arc::new(SymbolUniverse::parse("BTCUSDT\n"));
        DataHub::new(universe)
    }

    #[test]
    fn book_event_updates_per_venue_and_emits_unified() {
        let hub = hub();
        let ts = now_ts();
        hub.on_venue_event(
            Venue::Binance,
            "BTCUSDT",
            ts,
            VenueEventPayload::Book {
                bids: vec![(100.0, 2.0)],
                asks: vec![(101.0, 1.0)],
            },
        );
        assert_eq!(hub.queue_len(), 1);
    }

    #[test]
    fn unknown_symbol_is_silently_dropped() {
        let hub = hub();
        hub.on_venue_event(
            Venue::Binance,
            "DOGEUSDT",
            now_ts(),
            VenueEventPayload::Mark { price: 1.0 },
        );
        assert_eq!(hub.queue_len(), 0);
    }

    #[test]
    fn stale_timestamp_is_dropped() {
        let hub = hub();
        hub.on_venue_event(
            Venue::Binance,
            "BTCUSDT",
            now_ts() - 10_000.0,
            VenueEventPayload::Mark { price: 1.0 },
        );
        assert_eq!(hub.queue_len(), 0);
    }

    #[test]
    fn queue_overflow_drops_oldest() {
        let hub = hub();
        for i in 0..(QUEUE_CAP + 5) {
            let ts = now_ts();
            hub.on_venue_event(
                Venue::Binance,
                "BTCUSDT",
                ts,
                VenueEventPayload::Mark { price: 100.0 + i as f64 },
            );
        }
        assert!(hub.queue_len() <= QUEUE_CAP);
    }

    #[test]
    fn cross_venue_averaging_computes_mean_price() {
        let hub = hub();
        let ts = now_ts();
        hub.on_venue_event(Venue::Binance, "BTCUSDT", ts, VenueEventPayload::Mark { price: 100.0 });
        hub.on_venue_event(Venue::Bybit, "BTCUSDT", ts, VenueEventPayload::Mark { price: 102.0 });
        let tick = hub.queue.lock().back().cloned().unwrap();
        assert_eq!(tick.price, Some(101.0));
    }
}
