// =============================================================================
// Exit Manager — SHORT-only trailing-stop state machine
// =============================================================================

use tracing::info;

use crate::config::Config;
use crate::journal::Journal;
use crate::symbol_universe::SymbolUniverse;
use crate::types::CanonicalSymbol;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitOutcome {
    Hold,
    HardStop { pnl_pct: f64 },
    TrailingGiveback { pnl_pct: f64, giveback_pct: f64 },
}

impl ExitOutcome {
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            ExitOutcome::Hold => None,
            ExitOutcome::HardStop { .. } => Some("hard_stop"),
            ExitOutcome::TrailingGiveback { .. } => Some("trailing_giveback"),
        }
    }
}

/// Evaluates the exit state machine for one symbol's open position, if any.
/// Updates the journal's `best_low` tracking as a side effect. Returns
/// `Ok(ExitOutcome::Hold)` when there is no open position.
pub fn evaluate(
    cfg: &Config,
    journal: &Journal,
    allowlist: &SymbolUniverse,
    symbol: &CanonicalSymbol,
    current_price: f64,
) -> anyhow::Result<ExitOutcome> {
    let Some(position) = journal.get_open_position(symbol)? else {
        return Ok(ExitOutcome::Hold);
    };

    let best_low = position.best_low.min(current_price);
    if best_low < position.best_low {
        journal.update_best_low(allowlist, symbol, best_low)?;
    }

    let entry = position.entry_price;
    if entry <= 0.0 {
        return Ok(ExitOutcome::Hold);
    }

    // SHORT: profit accrues as price falls below entry.
    let pnl_pct = (entry - current_price) / entry * 100.0;
    let peak_pnl_pct = (entry - best_low) / entry * 100.0;

    if pnl_pct <= -cfg.hard_stop_loss_pct {
        info!(symbol = %symbol, pnl_pct, "exit: hard stop");
        return Ok(ExitOutcome::HardStop { pnl_pct });
    }

    if pnl_pct >= cfg.trail_activate_pct && peak_pnl_pct >= cfg.trail_activate_pct {
        let giveback_pct = peak_pnl_pct - pnl_pct;
        if giveback_pct >= cfg.trail_giveback_pct {
            info!(symbol = %symbol, pnl_pct, peak_pnl_pct, giveback_pct, "exit: trailing giveback");
            return Ok(ExitOutcome::TrailingGiveback { pnl_pct, giveback_pct });
        }
    }

    Ok(ExitOutcome::Hold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_ts;

    fn symbol() -> CanonicalSymbol {
        CanonicalSymbol::new("BTCUSDT")
    }

    fn allowlist() -> SymbolUniverse {
        SymbolUniverse::parse("BTCUSDT\n")
    }

    #[test]
    fn no_open_position_holds() {
        let cfg = Config::default();
        let journal = Journal::open_in_memory().unwrap();
        let outcome = evaluate(&cfg, &journal, &allowlist(), &symbol(), 100.0).unwrap();
        assert_eq!(outcome, ExitOutcome::Hold);
    }

    #[test]
    fn hard_stop_fires_on_adverse_move() {
        let cfg = Config::default();
        let journal = Journal::open_in_memory().unwrap();
        let allow = allowlist();
        let sym = symbol();
        journal.open_position(&allow, &sym, now_ts(), 100.0).unwrap();
        // price rises 2% against a short -> pnl_pct = -2.0, breaches -1.2%
        let outcome = evaluate(&cfg, &journal, &allow, &sym, 102.0).unwrap();
        assert!(matches!(outcome, ExitOutcome::HardStop { .. }));
    }

    #[test]
    fn holds_within_bounds() {
        let cfg = Config::default();
        let journal = Journal::open_in_memory().unwrap();
        let allow = allowlist();
        let sym = symbol();
        journal.open_position(&allow, &sym, now_ts(), 100.0).unwrap();
        let outcome = evaluate(&cfg, &journal, &allow, &sym, 99.8).unwrap();
        assert_eq!(outcome, ExitOutcome::Hold);
    }

    #[test]
    fn trailing_giveback_fires_after_peak_retraces() {
        let cfg = Config::default();
        let journal = Journal::open_in_memory().unwrap();
        let allow = allowlist();
        let sym = symbol();
        journal.open_position(&allow, &sym, now_ts(), 100.0).unwrap();
        // price falls to 99.0 -> peak pnl 1.0% (activates trail, best_low tracked)
        evaluate(&cfg, &journal, &allow, &sym, 99.0).unwrap();
        // price retraces to 99.5 -> pnl 0.5%, giveback from peak = 0.5% >= 0.4%
        let outcome = evaluate(&cfg, &journal, &allow, &sym, 99.5).unwrap();
        assert!(matches!(outcome, ExitOutcome::TrailingGiveback { .. }));
    }

    #[test]
    fn trail_does_not_fire_before_activation_threshold() {
        let cfg = Config::default();
        let journal = Journal::open_in_memory().unwrap();
        let allow = allowlist();
        let sym = symbol();
        journal.open_position(&allow, &sym, now_ts(), 100.0).unwrap();
        // price falls only to 99.9 -> peak pnl 0.1%, below 0.6% activation
        evaluate(&cfg, &journal, &allow, &sym, 99.9).unwrap();
        let outcome = evaluate(&cfg, &journal, &allow, &sym, 99.95).unwrap();
        assert_eq!(outcome, ExitOutcome::Hold);
    }
}
