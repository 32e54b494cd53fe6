// =============================================================================
// Entry Trigger — 7-condition gate, daily counter, cooldown, dedup
// =============================================================================

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use tracing::warn;

use crate::config::Config;
use crate::features::FeatureVector;
use crate::journal::Journal;
use crate::types::CanonicalSymbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Armed,
    Emitted,
    Cooldown,
}

pub struct TriggerOutcome {
    pub fire: bool,
    pub met: u8,
    pub total: u8,
    pub score: f64,
}

pub struct EntryTrigger {
    state: HashMap<CanonicalSymbol, TriggerState>,
    daily_count: u32,
    daily_reset_date: NaiveDate,
}

impl EntryTrigger {
    pub fn new() -> Self {
        Self {
            state: HashMap::new(),
            daily_count: 0,
            daily_reset_date: Utc::now().date_naive(),
        }
    }

    fn maybe_reset_daily(&mut self) {
        let today = Utc::now().date_naive();
        if today != self.daily_reset_date {
            self.daily_reset_date = today;
            self.daily_count = 0;
        }
    }

    /// Evaluates the 7-condition gate plus all orchestrator-level gates.
    /// Returns `Some(outcome)` when a diagnostic is worth logging (score
    /// reached the floor but gates failed) or the gate actually fired.
    pub fn evaluate(
        &mut self,
        cfg: &Config,
        journal: &Journal,
        symbol: &CanonicalSymbol,
        price: f64,
        feat: &FeatureVector,
    ) -> TriggerOutcome {
        self.maybe_reset_daily();

        let mut conditions = vec![
            feat.ask_dom > 0.6,
            feat.gap_above > 0.005,
            feat.spread_pct < 0.002,
            feat.oi_divergence > 0.0,
            feat.funding_impulse < 0.0,
            feat.btc_alignment < 0.5,
        ];
        if cfg.sweep_rejection_condition {
            conditions.push(feat.sweep_rejection >= 0.7);
        }
        let total = conditions.len() as u8;
        let met = conditions.iter().filter(|c| **c).count() as u8;
        let required = if cfg.sweep_rejection_condition { 6 } else { 5 };

        let s = crate::scorer::score(feat);

        let mut fire = met >= required
            && s >= cfg.score_min
            && price <= cfg.max_price
            && self.daily_count < cfg.max_signals_per_day
            && journal.get_open_position(symbol).ok().flatten().is_none();

        if fire {
            if journal
                .seen_recent_symbol_signal(symbol, cfg.entry_cooldown_sec, "entry")
                .unwrap_or(false)
            {
                fire = false;
            }
        }

        if fire {
            let hash = dedup_hash(symbol, price, s, feat);
            if journal
                .seen_recent_signal(symbol, &hash, cfg.dedup_window_sec)
                .unwrap_or(false)
            {
                fire = false;
            }
        }

        if !fire && s >= 60.0 && met < required {
            warn!(
                symbol = %symbol,
                score = s,
                met,
                total,
                sweep_rejection = feat.sweep_rejection,
                ask_dom = feat.ask_dom,
                gap_above = feat.gap_above,
                spread_pct = feat.spread_pct,
                oi_divergence = feat.oi_divergence,
                funding_impulse = feat.funding_impulse,
                btc_alignment = feat.btc_alignment,
                "entry gate missed: score high but conditions unmet"
            );
        }

        if fire {
            self.daily_count += 1;
            self.state.insert(symbol.clone(), TriggerState::Emitted);
        }

        TriggerOutcome { fire, met, total, score: s }
    }
}

impl Default for EntryTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// Content hash over symbol, price rounded to 5dp, score rounded to int, and
/// the six dedup feature keys rounded to 4dp.
pub fn dedup_hash(symbol: &CanonicalSymbol, price: f64, score: f64, feat: &FeatureVector) -> String {
    use sha1::{Digest, Sha1};
    let rounded_price = (price * 1e5).round() / 1e5;
    let rounded_score = score.round() as i64;
    let keys: Vec<f64> = feat
        .dedup_keys()
        .iter()
        .map(|v| (v * 1e4).round() / 1e4)
        .collect();
    let payload = format!(
        "{}|{:.5}|{}|{:.4}|{:.4}|{:.4}|{:.4}|{:.4}|{:.4}",
        symbol.as_str(),
        rounded_price,
        rounded_score,
        keys[0],
        keys[1],
        keys[2],
        keys[3],
        keys[4],
        keys[5],
    );
    let mut hasher = Sha1::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_features() -> FeatureVector {
        FeatureVector {
            sweep_rejection: 0.9,
            ask_dom: 0.72,
            gap_above: 0.006,
            spread_pct: 0.0015,
            oi_divergence: 0.10,
            funding_impulse: -0.002,
            btc_alignment: 0.30,
            liquidity_pressure: 0.10,
            orderflow_imbalance: 0.72,
            short_momentum: 0.2,
            volatility_burst: 0.1,
            near_resistance: 1.0,
            price_falling: true,
            spread_not_collapsing: true,
            btc_not_pumping: true,
        }
    }

    #[test]
    fn dedup_hash_is_deterministic() {
        let feat = sample_features();
        let symbol = CanonicalSymbol::new("BTCUSDT");
        let h1 = dedup_hash(&symbol, 1.23456, 72.0, &feat);
        let h2 = dedup_hash(&symbol, 1.23456, 72.0, &feat);
        assert_eq!(h1, h2);
    }

    #[test]
    fn dedup_hash_changes_with_price() {
        let feat = sample_features();
        let symbol = CanonicalSymbol::new("BTCUSDT");
        let h1 = dedup_hash(&symbol, 1.0, 72.0, &feat);
        let h2 = dedup_hash(&symbol, 2.0, 72.0, &feat);
        assert_ne!(h1, h2);
    }

    #[test]
    fn six_of_seven_conditions_required_when_sweep_enabled() {
        let cfg = Config {
            sweep_rejection_condition: true,
            ..Config::default()
        };
        let journal = Journal::open_in_memory().unwrap();
        let mut trigger = EntryTrigger::new();
        let symbol = CanonicalSymbol::new("BTCUSDT");
        let mut feat = sample_features();
        feat.oi_divergence = 0.0;
        feat.funding_impulse = 0.0;
        let outcome = trigger.evaluate(&cfg, &journal, &symbol, 1.0, &feat);
        assert!(!outcome.fire);
    }

    #[test]
    fn clean_entry_fires_with_default_config() {
        let cfg = Config::default();
        let journal = Journal::open_in_memory().unwrap();
        let mut trigger = EntryTrigger::new();
        let symbol = CanonicalSymbol::new("BTCUSDT");
        let feat = sample_features();
        let outcome = trigger.evaluate(&cfg, &journal, &symbol, 1.0, &feat);
        assert!(outcome.fire);
    }
}
