// =============================================================================
// Symbol Universe — allowlist loading and canonical <-> venue-local translation
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};

use crate::types::{CanonicalSymbol, Venue};

/// Local symbol prefixes Binance perpetuals reject (stock-wrapper tickers).
const BINANCE_BLACKLIST_PREFIXES: &[&str] = &["AAPL", "AAPLX", "2Z", "4"];

#[derive(Debug, Clone)]
pub struct SymbolUniverse {
    symbols: Vec<CanonicalSymbol>,
    lookup: HashSet<CanonicalSymbol>,
}

impl SymbolUniverse {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read symbol allowlist from {}", path.display()))?;
        Ok(Self::parse(&content))
    }

    pub(crate) fn parse(content: &str) -> Self {
        let mut symbols = Vec::new();
        let mut lookup = HashSet::new();
        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let normalized = line.replace('/', "").to_uppercase();
            let sym = CanonicalSymbol::new(&normalized);
            if lookup.insert(sym.clone()) {
                symbols.push(sym);
            }
        }
        Self { symbols, lookup }
    }

    pub fn contains(&self, symbol: &CanonicalSymbol) -> bool {
        self.lookup.contains(symbol)
    }

    pub fn symbols(&self) -> &[CanonicalSymbol] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Per-venue local symbol forms, with venue-specific translation and
    /// blacklist filtering applied.
    pub fn universe_by_exchange(&self) -> HashMap<Venue, Vec<String>> {
        let mut out = HashMap::new();
        for venue in Venue::ALL {
            let locals: Vec<String> = self
                .symbols
                .iter()
                .filter(|s| venue != Venue::Binance || !is_binance_blacklisted(s.as_str()))
                .map(|s| to_local(venue, s))
                .collect();
            out.insert(venue, locals);
        }
        out
    }

    pub fn to_canonical(&self, venue: Venue, local: &str) -> CanonicalSymbol {
        match venue {
            Venue::Lbank => CanonicalSymbol::new(&local.replace('_', "")),
            _ => CanonicalSymbol::new(local),
        }
    }
}

fn is_binance_blacklisted(canonical: &str) -> bool {
    BINANCE_BLACKLIST_PREFIXES
        .iter()
        .any(|p| canonical.starts_with(p))
}

fn to_local(venue: Venue, symbol: &CanonicalSymbol) -> String {
    match venue {
        Venue::Lbank => canon_to_lbank(symbol.as_str()),
        _ => symbol.as_str().to_string(),
    }
}

/// `BTCUSDT -> btc_usdt`. Splits on the common quote suffixes; falls back to
/// a straight lowercase if no known quote is found.
fn canon_to_lbank(canonical: &str) -> String {
    const QUOTES: &[&str] = &["USDT", "USDC", "USD"];
    for quote in QUOTES {
        if let Some(base) = canonical.strip_suffix(quote) {
            if !base.is_empty() {
                return format!("{}_{}", base.to_lowercase(), quote.to_lowercase());
            }
        }
    }
    canonical.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_allowlist_with_comments_and_dedup() {
        let content = "# comment\nBTC/USDT\nETHUSDT\nbtcusdt\n\nETHUSDT\n";
        let universe = SymbolUniverse::parse(content);
        assert_eq!(universe.len(), 2);
        assert_eq!(universe.symbols()[0].as_str(), "BTCUSDT");
        assert_eq!(universe.symbols()[1].as_str(), "ETHUSDT");
    }

    #[test]
    fn contains_checks_allowlist_membership() {
        let universe = SymbolUniverse::parse("BTCUSDT\n");
        assert!(universe.contains(&CanonicalSymbol::new("BTCUSDT")));
        assert!(!universe.contains(&CanonicalSymbol::new("ETHUSDT")));
    }

    #[test]
    fn lbank_translation_splits_base_quote() {
        assert_eq!(canon_to_lbank("BTCUSDT"), "btc_usdt");
        assert_eq!(canon_to_lbank("ETHUSDC"), "eth_usdc");
    }

    #[test]
    fn binance_blacklist_prefixes_are_excluded() {
        let universe = SymbolUniverse::parse("AAPLXUSDT\nBTCUSDT\n");
        let by_venue = universe.universe_by_exchange();
        let binance = &by_venue[&Venue::Binance];
        assert!(!binance.contains(&"AAPLXUSDT".to_string()));
        assert!(binance.contains(&"BTCUSDT".to_string()));
        let bybit = &by_venue[&Venue::Bybit];
        assert!(bybit.contains(&"AAPLXUSDT".to_string()));
    }

    #[test]
    fn universe_by_exchange_translates_lbank() {
        let universe = SymbolUniverse::parse("BTCUSDT\n");
        let by_venue = universe.universe_by_exchange();
        assert_eq!(by_venue[&Venue::Lbank], vec!["btc_usdt".to_string()]);
    }

    #[test]
    fn to_canonical_roundtrips_lbank() {
        let universe = SymbolUniverse::parse("BTCUSDT\n");
        assert_eq!(
            universe.to_canonical(Venue::Lbank, "btc_usdt"),
            CanonicalSymbol::new("BTCUSDT")
        );
    }
}
