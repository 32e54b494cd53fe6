// =============================================================================
// Orchestrator — consumes the Data Hub queue, drives the feature/scoring/
// trigger/exit pipeline, and persists everything through the Journal
// =============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::entry_trigger::{dedup_hash, EntryTrigger};
use crate::exit_manager::{self, ExitOutcome};
use crate::features::{BtcRegime, FeaturePipeline};
use crate::hub::DataHub;
use crate::journal::Journal;
use crate::notifier::Notifier;
use crate::symbol_universe::SymbolUniverse;
use crate::types::{now_ts, CanonicalSymbol, SignalType};

pub struct Orchestrator {
    hub: Arc<DataHub>,
    journal: Arc<Journal>,
    notifier: Arc<dyn Notifier>,
    universe: Arc<SymbolUniverse>,
    btc: Arc<Mutex<BtcRegime>>,
    config: Config,
}

impl Orchestrator {
    pub fn new(
        hub: Arc<DataHub>,
        journal: Arc<Journal>,
        notifier: Arc<dyn Notifier>,
        universe: Arc<SymbolUniverse>,
        btc: Arc<Mutex<BtcRegime>>,
        config: Config,
    ) -> Self {
        Self { hub, journal, notifier, universe, btc, config }
    }

    /// Runs forever, one unified tick at a time. This is the engine's single
    /// writer to the Journal's signal/position tables — every other task
    /// only reads or writes ticks/features/ranks. BTC regime state is fed
    /// by a dedicated 30s klines poll task, not by ticks flowing through
    /// here (a BTCUSDT tick can arrive at any cadence; the regime ring
    /// needs one slot per minute).
    pub async fn run(&self) {
        let mut pipeline = FeaturePipeline::new();
        let mut trigger = EntryTrigger::new();

        loop {
            let tick = self.hub.recv().await;

            if let Err(e) = self.journal.store_unified(&self.universe, &tick) {
                warn!(symbol = %tick.symbol, error = %e, "failed to persist unified tick");
            }

            let feat = {
                let btc = self.btc.lock();
                pipeline.ingest(&tick, &btc)
            };

            let Some(price) = tick.price else {
                continue;
            };

            if let Ok(blob) = crate::journal_blob::encode(&feat) {
                if let Err(e) =
                    self.journal
                        .store_features(&self.universe, &tick.symbol, tick.timestamp, &blob)
                {
                    warn!(symbol = %tick.symbol, error = %e, "failed to persist features");
                }
            }

            let score = crate::scorer::score(&feat);
            if let Err(e) = self
                .journal
                .store_rank(&self.universe, &tick.symbol, tick.timestamp, score)
            {
                warn!(symbol = %tick.symbol, error = %e, "failed to persist rank");
            }

            self.evaluate_exit(&tick.symbol, price).await;
            self.evaluate_entry(&mut trigger, &tick.symbol, price, &feat, score).await;
        }
    }

    async fn evaluate_exit(&self, symbol: &CanonicalSymbol, price: f64) {
        let outcome =
            match exit_manager::evaluate(&self.config, &self.journal, &self.universe, symbol, price) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "exit evaluation failed");
                    return;
                }
            };

        let Some(reason) = outcome.reason() else {
            return;
        };

        let pnl_pct = match outcome {
            ExitOutcome::HardStop { pnl_pct } => pnl_pct,
            ExitOutcome::TrailingGiveback { pnl_pct, .. } => pnl_pct,
            ExitOutcome::Hold => unreachable!(),
        };

        let ts = now_ts();
        if let Err(e) = self
            .journal
            .close_position(&self.universe, symbol, ts, price, reason, pnl_pct)
        {
            warn!(symbol = %symbol, error = %e, "failed to close position");
            return;
        }
        if let Err(e) = self.journal.store_signal(
            &self.universe,
            symbol,
            0.0,
            price,
            reason,
            "",
            SignalType::Exit,
        ) {
            warn!(symbol = %symbol, error = %e, "failed to record exit signal");
        }
        self.notifier.send_exit(symbol, reason, price, pnl_pct).await;
        info!(symbol = %symbol, price, pnl_pct, reason, "position closed");
    }

    async fn evaluate_entry(
        &self,
        trigger: &mut EntryTrigger,
        symbol: &CanonicalSymbol,
        price: f64,
        feat: &crate::features::FeatureVector,
        score: f64,
    ) {
        let outcome = trigger.evaluate(&self.config, &self.journal, symbol, price, feat);
        if !outcome.fire {
            debug!(symbol = %symbol, met = outcome.met, total = outcome.total, score = outcome.score, "entry gate not met");
            return;
        }

        let ts = now_ts();
        if let Err(e) = self.journal.open_position(&self.universe, symbol, ts, price) {
            warn!(symbol = %symbol, error = %e, "failed to open position");
            return;
        }

        let hash = dedup_hash(symbol, price, score, feat);
        let reason = format!("score={score:.1} met={}/{}", outcome.met, outcome.total);
        if let Err(e) = self.journal.store_signal(
            &self.universe,
            symbol,
            score,
            price,
            &reason,
            &hash,
            SignalType::Entry,
        ) {
            warn!(symbol = %symbol, error = %e, "failed to record entry signal");
        }

        self.notifier.send_signal(symbol, score, price, feat).await;
        info!(symbol = %symbol, score, price, "entry signal fired");
    }
}
