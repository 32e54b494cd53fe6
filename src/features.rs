// =============================================================================
// Feature Pipeline — per-symbol rolling state, BTC regime, derived scalars
// =============================================================================

use std::collections::HashMap;

use crate::hub::UnifiedTick;
use crate::ring_buffer::RingBuffer;
use crate::types::CanonicalSymbol;

const PRICE_WINDOW_CAP: usize = 120;
const VOLATILITY_CAP: usize = 600;
const BTC_REGIME_CAP: usize = 360;

#[derive(Debug, Clone, Default)]
pub struct FeatureVector {
    pub ask_dom: f64,
    pub spread_pct: f64,
    pub gap_above: f64,
    pub sweep_rejection: f64,
    pub volatility_burst: f64,
    pub short_momentum: f64,
    pub funding_impulse: f64,
    pub oi_divergence: f64,
    pub btc_alignment: f64,
    pub liquidity_pressure: f64,
    pub orderflow_imbalance: f64,
    pub near_resistance: f64,
    pub price_falling: bool,
    pub spread_not_collapsing: bool,
    pub btc_not_pumping: bool,
}

impl FeatureVector {
    /// The six keys the dedup hash is computed over, in canonical order.
    pub fn dedup_keys(&self) -> [f64; 6] {
        [
            self.sweep_rejection,
            self.liquidity_pressure, // stands in for liquidity_gap_above
            self.orderflow_imbalance,
            self.volatility_burst,
            self.short_momentum,
            if self.btc_not_pumping { 1.0 } else { 0.0 },
        ]
    }
}

struct SymbolState {
    price_window: RingBuffer<(f64, f64)>,
    volatility: RingBuffer<(f64, f64)>,
    last_oi: Option<f64>,
}

impl SymbolState {
    fn new() -> Self {
        Self {
            price_window: RingBuffer::new(PRICE_WINDOW_CAP),
            volatility: RingBuffer::new(VOLATILITY_CAP),
            last_oi: None,
        }
    }
}

pub struct BtcRegime {
    ring: RingBuffer<(f64, f64)>,
}

impl BtcRegime {
    pub fn new() -> Self {
        Self {
            ring: RingBuffer::new(BTC_REGIME_CAP),
        }
    }

    pub fn push(&mut self, ts: f64, close: f64) {
        self.ring.push((ts, close));
    }

    fn return_over(&self, minutes: usize) -> f64 {
        let closes: Vec<f64> = self.ring.iter().map(|(_, c)| *c).collect();
        if closes.len() <= minutes {
            return 0.0;
        }
        let last = *closes.last().unwrap();
        let prior = closes[closes.len() - 1 - minutes];
        if prior == 0.0 {
            0.0
        } else {
            (last - prior) / prior
        }
    }

    pub fn alignment(&self) -> (f64, bool) {
        let r5 = self.return_over(5);
        let r60 = self.return_over(60);
        let pump = (r5.max(r60) / 0.03).clamp(0.0, 1.0);
        (1.0 - pump, pump < 0.4)
    }
}

impl Default for BtcRegime {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FeaturePipeline {
    state: HashMap<CanonicalSymbol, SymbolState>,
}

impl FeaturePipeline {
    pub fn new() -> Self {
        Self {
            state: HashMap::new(),
        }
    }

    pub fn ingest(&mut self, tick: &UnifiedTick, btc: &BtcRegime) -> FeatureVector {
        let state = self
            .state
            .entry(tick.symbol.clone())
            .or_insert_with(SymbolState::new);

        let price = tick.price.unwrap_or(0.0);
        if price > 0.0 {
            state.price_window.push((tick.timestamp, price));
            if (tick.timestamp - crate::types::now_ts()).abs() < 300.0 {
                state.volatility.push((tick.timestamp, price));
            }
        }

        let ask_total = tick.ask_total.unwrap_or(0.0);
        let bid_total = tick.bid_total.unwrap_or(0.0);
        let ask_dom = if ask_total + bid_total > 0.0 {
            (ask_total / (ask_total + bid_total)).clamp(0.0, 1.0)
        } else {
            0.5
        };

        let spread_pct = match (tick.spread, tick.price) {
            (Some(s), Some(p)) if p > 0.0 => s / p,
            _ => 0.0,
        };

        let funding_impulse = match tick.funding {
            Some(rate) => (-rate / 0.01).clamp(-1.0, 1.0),
            None => 0.0,
        };

        let oi_divergence = match (tick.oi, state.last_oi) {
            (Some(oi), Some(prev)) if prev != 0.0 => {
                ((oi - prev) / prev).clamp(-1.0, 1.0).max(0.0)
            }
            _ => 0.0,
        };
        if let Some(oi) = tick.oi {
            state.last_oi = Some(oi);
        }

        let r = last_return(&state.price_window);
        let short_momentum = (r.min(0.0).abs() / 0.003).clamp(0.0, 1.0);

        let volatility_burst = burst_volatility(&state.volatility);

        let (btc_alignment, btc_not_pumping) = btc.alignment();

        let near_resistance = near_resistance(&state.price_window, price);

        let gap_above = 0.0_f64;
        let liquidity_pressure = (gap_above / 0.002).clamp(0.0, 1.0);
        let orderflow_imbalance = ask_dom;
        let sweep_rejection = 0.0_f64;

        FeatureVector {
            ask_dom,
            spread_pct,
            gap_above,
            sweep_rejection,
            volatility_burst,
            short_momentum,
            funding_impulse,
            oi_divergence,
            btc_alignment,
            liquidity_pressure,
            orderflow_imbalance,
            near_resistance,
            price_falling: r < 0.0,
            spread_not_collapsing: spread_pct > 0.00005,
            btc_not_pumping,
        }
    }
}

impl Default for FeaturePipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn last_return(window: &RingBuffer<(f64, f64)>) -> f64 {
    let tail = window.tail(2);
    if tail.len() < 2 {
        return 0.0;
    }
    let (_, prev) = tail[0];
    let (_, last) = tail[1];
    if *prev == 0.0 {
        0.0
    } else {
        (last - prev) / prev
    }
}

fn burst_volatility(window: &RingBuffer<(f64, f64)>) -> f64 {
    let now = crate::types::now_ts();
    let recent: Vec<f64> = window
        .iter()
        .filter(|(ts, _)| now - ts <= 60.0)
        .map(|(_, p)| *p)
        .collect();
    if recent.len() < 5 {
        return 0.0;
    }
    let returns: Vec<f64> = recent
        .windows(2)
        .filter_map(|w| if w[0] != 0.0 { Some((w[1] - w[0]) / w[0]) } else { None })
        .collect();
    if returns.len() < 4 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    let stddev = variance.sqrt();
    (stddev / 0.002).clamp(0.0, 1.0)
}

fn near_resistance(window: &RingBuffer<(f64, f64)>, last_price: f64) -> f64 {
    let now = crate::types::now_ts();
    let recent_max = window
        .iter()
        .filter(|(ts, _)| now - ts <= 60.0)
        .map(|(_, p)| *p)
        .fold(f64::MIN, f64::max);
    if recent_max == f64::MIN || last_price <= 0.0 {
        return 1.0;
    }
    (recent_max - last_price) / last_price
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CanonicalSymbol;

    fn tick(symbol: &str, ts: f64, price: f64) -> UnifiedTick {
        UnifiedTick {
            symbol: CanonicalSymbol::new(symbol),
            timestamp: ts,
            price: Some(price),
            mark: Some(price),
            funding: None,
            oi: None,
            spread: Some(0.1),
            bid_total: Some(10.0),
            ask_total: Some(20.0),
            imbalance: Some(0.33),
        }
    }

    #[test]
    fn ask_dom_defaults_to_half_when_no_depth() {
        let mut pipeline = FeaturePipeline::new();
        let btc = BtcRegime::new();
        let mut t = tick("BTCUSDT", crate::types::now_ts(), 100.0);
        t.ask_total = None;
        t.bid_total = None;
        let feat = pipeline.ingest(&t, &btc);
        assert_eq!(feat.ask_dom, 0.5);
    }

    #[test]
    fn funding_impulse_negative_rate_is_positive_impulse() {
        let mut pipeline = FeaturePipeline::new();
        let btc = BtcRegime::new();
        let mut t = tick("BTCUSDT", crate::types::now_ts(), 100.0);
        t.funding = Some(-0.005);
        let feat = pipeline.ingest(&t, &btc);
        assert!(feat.funding_impulse > 0.0);
        assert!((feat.funding_impulse - 0.5).abs() < 1e-9);
    }

    #[test]
    fn oi_divergence_only_positive_on_increase() {
        let mut pipeline = FeaturePipeline::new();
        let btc = BtcRegime::new();
        let now = crate::types::now_ts();
        let mut t1 = tick("BTCUSDT", now, 100.0);
        t1.oi = Some(1000.0);
        pipeline.ingest(&t1, &btc);

        let mut t2 = tick("BTCUSDT", now + 1.0, 100.0);
        t2.oi = Some(1100.0);
        let feat = pipeline.ingest(&t2, &btc);
        assert!(feat.oi_divergence > 0.0);
    }

    #[test]
    fn short_momentum_zero_on_rising_price() {
        let mut pipeline = FeaturePipeline::new();
        let btc = BtcRegime::new();
        let now = crate::types::now_ts();
        pipeline.ingest(&tick("BTCUSDT", now, 100.0), &btc);
        let feat = pipeline.ingest(&tick("BTCUSDT", now + 1.0, 101.0), &btc);
        assert_eq!(feat.short_momentum, 0.0);
        assert!(!feat.price_falling);
    }

    #[test]
    fn btc_regime_alignment_flat_regime_is_fully_aligned() {
        let mut btc = BtcRegime::new();
        for i in 0..100 {
            btc.push(i as f64, 100.0);
        }
        let (alignment, not_pumping) = btc.alignment();
        assert_eq!(alignment, 1.0);
        assert!(not_pumping);
    }

    #[test]
    fn dedup_keys_returns_six_values_in_order() {
        let feat = FeatureVector {
            sweep_rejection: 0.9,
            liquidity_pressure: 0.1,
            orderflow_imbalance: 0.7,
            volatility_burst: 0.2,
            short_momentum: 0.3,
            btc_not_pumping: true,
            ..Default::default()
        };
        let keys = feat.dedup_keys();
        assert_eq!(keys, [0.9, 0.1, 0.7, 0.2, 0.3, 1.0]);
    }
}
