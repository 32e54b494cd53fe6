// =============================================================================
// Notifier — external signal/exit delivery contract
// =============================================================================

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::info;

use crate::features::FeatureVector;
use crate::types::{now_ts, CanonicalSymbol};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns whether the signal was actually delivered (`false` when
    /// suppressed, e.g. by a cooldown decorator).
    async fn send_signal(
        &self,
        symbol: &CanonicalSymbol,
        score: f64,
        price: f64,
        features: &FeatureVector,
    ) -> bool;

    async fn send_exit(
        &self,
        symbol: &CanonicalSymbol,
        reason: &str,
        exit_price: f64,
        pnl_pct: f64,
    ) -> bool;
}

/// Reference notifier: structured log lines only. Real delivery (webhook,
/// bot API, etc.) is an external concern this engine hands a formatted
/// message to, not something it owns.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send_signal(
        &self,
        symbol: &CanonicalSymbol,
        score: f64,
        price: f64,
        features: &FeatureVector,
    ) -> bool {
        info!(
            symbol = %symbol,
            score,
            price,
            oi_divergence = features.oi_divergence,
            liquidity_gap = features.gap_above,
            sweep_rejection = features.sweep_rejection,
            funding_impulse = features.funding_impulse,
            btc_alignment = features.btc_alignment,
            "SIGNAL entry"
        );
        true
    }

    async fn send_exit(
        &self,
        symbol: &CanonicalSymbol,
        reason: &str,
        exit_price: f64,
        pnl_pct: f64,
    ) -> bool {
        info!(symbol = %symbol, reason, exit_price, pnl_pct, "SIGNAL exit");
        true
    }
}

/// Wraps a `Notifier`, suppressing repeat notifications for the same symbol
/// within a cooldown window. The Entry/Exit Trigger gates already enforce
/// cooldowns against the journal; this decorator is a second, in-process
/// line of defense against duplicate delivery within a single process
/// lifetime (e.g. a bug upstream firing twice in the same tick).
pub struct CooldownNotifier<N: Notifier> {
    inner: N,
    last_sent: Mutex<HashMap<CanonicalSymbol, f64>>,
    cooldown_sec: f64,
}

impl<N: Notifier> CooldownNotifier<N> {
    pub fn new(inner: N, cooldown_sec: u64) -> Self {
        Self {
            inner,
            last_sent: Mutex::new(HashMap::new()),
            cooldown_sec: cooldown_sec as f64,
        }
    }

    fn should_send(&self, symbol: &CanonicalSymbol) -> bool {
        let now = now_ts();
        let mut last_sent = self.last_sent.lock();
        let fresh = match last_sent.get(symbol) {
            Some(ts) => now - ts >= self.cooldown_sec,
            None => true,
        };
        if fresh {
            last_sent.insert(symbol.clone(), now);
        }
        fresh
    }
}

#[async_trait]
impl<N: Notifier> Notifier for CooldownNotifier<N> {
    async fn send_signal(
        &self,
        symbol: &CanonicalSymbol,
        score: f64,
        price: f64,
        features: &FeatureVector,
    ) -> bool {
        if self.should_send(symbol) {
            self.inner.send_signal(symbol, score, price, features).await
        } else {
            false
        }
    }

    async fn send_exit(
        &self,
        symbol: &CanonicalSymbol,
        reason: &str,
        exit_price: f64,
        pnl_pct: f64,
    ) -> bool {
        if self.should_send(symbol) {
            self.inner.send_exit(symbol, reason, exit_price, pnl_pct).await
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingNotifier(Arc<AtomicUsize>);

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn send_signal(
            &self,
            _symbol: &CanonicalSymbol,
            _score: f64,
            _price: f64,
            _features: &FeatureVector,
        ) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
        async fn send_exit(
            &self,
            _symbol: &CanonicalSymbol,
            _reason: &str,
            _exit_price: f64,
            _pnl_pct: f64,
        ) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[tokio::test]
    async fn cooldown_suppresses_repeat_signal_within_window() {
        let count = Arc::new(AtomicUsize::new(0));
        let notifier = CooldownNotifier::new(CountingNotifier(count.clone()), 300);
        let symbol = CanonicalSymbol::new("BTCUSDT");
        let feat = FeatureVector::default();
        notifier.send_signal(&symbol, 70.0, 1.0, &feat).await;
        notifier.send_signal(&symbol, 70.0, 1.0, &feat).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cooldown_allows_different_symbols_independently() {
        let count = Arc::new(AtomicUsize::new(0));
        let notifier = CooldownNotifier::new(CountingNotifier(count.clone()), 300);
        let feat = FeatureVector::default();
        notifier
            .send_signal(&CanonicalSymbol::new("BTCUSDT"), 70.0, 1.0, &feat)
            .await;
        notifier
            .send_signal(&CanonicalSymbol::new("ETHUSDT"), 70.0, 1.0, &feat)
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
