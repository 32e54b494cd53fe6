// =============================================================================
// Short-Signal Engine — Main Entry Point
// =============================================================================
//
// Fans in Binance/Bybit/MEXC/LBank perpetual futures market data, scores
// every symbol for a short-biased microstructure setup, and journals every
// tick, feature, signal and position to a local SQLite store. Read-only
// status is served by the separate `status` binary.
// =============================================================================

mod config;
mod entry_trigger;
mod exit_manager;
mod features;
mod hub;
mod journal;
mod journal_blob;
mod notifier;
mod orchestrator;
mod ring_buffer;
mod scorer;
mod symbol_universe;
mod types;
mod venue;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::hub::DataHub;
use crate::journal::Journal;
use crate::notifier::{CooldownNotifier, LoggingNotifier};
use crate::orchestrator::Orchestrator;
use crate::symbol_universe::SymbolUniverse;
use crate::types::Venue;
use crate::venue::binance::BinanceAdapter;
use crate::venue::bybit::BybitAdapter;
use crate::venue::lbank::LbankAdapter;
use crate::venue::mexc::MexcAdapter;
use crate::venue::VenueAdapter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("short-signal engine starting up");

    let config = Config::from_env();
    let universe = Arc::new(
        SymbolUniverse::load_from_file(&config.symbols_path)
            .unwrap_or_else(|e| {
                warn!(error = %e, path = %config.symbols_path.display(), "failed to load symbol allowlist, starting empty");
                SymbolUniverse::parse("")
            }),
    );
    info!(count = universe.len(), "symbol allowlist loaded");

    let hub = Arc::new(DataHub::new(universe.clone()));
    let journal = Arc::new(Journal::open(&config.journal_path)?);
    let notifier: Arc<dyn crate::notifier::Notifier> =
        Arc::new(CooldownNotifier::new(LoggingNotifier, config.exit_cooldown_sec));

    let binance_adapter = Arc::new(BinanceAdapter::new());
    let adapters: Vec<(Venue, Arc<dyn VenueAdapter>)> = vec![
        (Venue::Binance, binance_adapter.clone() as Arc<dyn VenueAdapter>),
        (Venue::Bybit, Arc::new(BybitAdapter::new())),
        (Venue::Mexc, Arc::new(MexcAdapter::new())),
        (Venue::Lbank, Arc::new(LbankAdapter::new())),
    ];

    let by_exchange = universe.universe_by_exchange();

    // ── Venue ingest tasks ──────────────────────────────────────────────
    for (venue, adapter) in &adapters {
        let symbols = by_exchange.get(venue).cloned().unwrap_or_default();
        if symbols.is_empty() {
            continue;
        }
        let adapter = adapter.clone();
        let hub_for_sink = hub.clone();
        let venue_name = *venue;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let symbols = symbols.clone();
                if let Err(e) = adapter.run(symbols, tx.clone()).await {
                    warn!(venue = %venue_name, error = %e, "venue adapter exited, retrying in 5s");
                }
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        });

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                hub_for_sink.on_venue_event(event.venue, &event.symbol_local, event.timestamp, event.payload);
            }
        });
    }

    // ── Funding/OI poll loop (60s) ───────────────────────────────────────
    {
        let hub = hub.clone();
        let adapters = adapters.clone();
        let by_exchange = by_exchange.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                hub.funding_oi_tick(&adapters, &by_exchange).await;
            }
        });
    }

    // ── BTC regime klines poll loop (30s) ────────────────────────────────
    let btc = Arc::new(parking_lot::Mutex::new(crate::features::BtcRegime::new()));
    {
        let btc = btc.clone();
        let binance_adapter = binance_adapter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            let mut last_close_ts = 0.0_f64;
            loop {
                interval.tick().await;
                match binance_adapter.fetch_btc_klines("BTCUSDT", 120).await {
                    Ok(klines) => {
                        let mut guard = btc.lock();
                        for (close_ts, close) in klines {
                            if close_ts > last_close_ts {
                                guard.push(close_ts, close);
                                last_close_ts = close_ts;
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "btc regime klines poll failed"),
                }
            }
        });
    }

    // ── Staleness check loop (60s) ───────────────────────────────────────
    {
        let hub = hub.clone();
        let adapters = adapters.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                hub.staleness_tick(&adapters);
            }
        });
    }

    // ── Journal retention sweep (daily) ──────────────────────────────────
    {
        let journal = journal.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(86400));
            loop {
                interval.tick().await;
                if let Err(e) = journal.prune_old(30.0) {
                    warn!(error = %e, "journal retention sweep failed");
                }
            }
        });
    }

    info!("all subsystems launched, starting orchestrator consumer loop");

    // ── Orchestrator consumer loop ───────────────────────────────────────
    let orchestrator = Orchestrator::new(hub, journal, notifier, universe, btc, config);
    tokio::select! {
        _ = orchestrator.run() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received");
        }
    }

    info!("short-signal engine shut down complete");
    Ok(())
}
