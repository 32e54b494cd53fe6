// =============================================================================
// Journal — single-writer WAL-mode embedded store for ticks, features,
// signals, positions, and ranks
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::hub::UnifiedTick;
use crate::symbol_universe::SymbolUniverse;
use crate::types::{now_ts, CanonicalSymbol, PositionStatus, SignalType};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS unified_ticks (
    ts REAL NOT NULL,
    sym TEXT NOT NULL,
    price REAL,
    mark REAL,
    funding REAL,
    oi REAL,
    spread REAL,
    volume REAL,
    bid_total REAL,
    ask_total REAL,
    imbalance REAL,
    UNIQUE(sym, ts)
);
CREATE INDEX IF NOT EXISTS idx_unified_ticks_ts ON unified_ticks(ts);

CREATE TABLE IF NOT EXISTS features (
    ts REAL NOT NULL,
    sym TEXT NOT NULL,
    data_blob TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_features_ts ON features(ts);

CREATE TABLE IF NOT EXISTS signals (
    ts REAL NOT NULL,
    sym TEXT NOT NULL,
    score REAL NOT NULL,
    entry_price REAL NOT NULL,
    reason TEXT NOT NULL,
    dedup_hash TEXT NOT NULL,
    signal_type TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_signals_ts ON signals(ts);
CREATE INDEX IF NOT EXISTS idx_signals_sym_ts ON signals(sym, ts);
CREATE INDEX IF NOT EXISTS idx_signals_sym_hash ON signals(sym, dedup_hash);

CREATE TABLE IF NOT EXISTS positions (
    sym TEXT NOT NULL,
    entry_ts REAL NOT NULL,
    entry_price REAL NOT NULL,
    status TEXT NOT NULL,
    best_low REAL NOT NULL,
    exit_ts REAL,
    exit_price REAL,
    exit_reason TEXT,
    pnl_pct REAL
);
CREATE INDEX IF NOT EXISTS idx_positions_sym ON positions(sym);
CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status);

CREATE TABLE IF NOT EXISTS ranks (
    ts REAL NOT NULL,
    sym TEXT NOT NULL,
    score REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ranks_ts ON ranks(ts);
"#;

#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: CanonicalSymbol,
    pub entry_ts: f64,
    pub entry_price: f64,
    pub status: PositionStatus,
    pub best_low: f64,
    pub exit_ts: Option<f64>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<String>,
    pub pnl_pct: Option<f64>,
}

pub struct Journal {
    conn: Mutex<Connection>,
}

const FRESHNESS_SEC: f64 = 300.0;

impl Journal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("failed to open journal at {}", path.as_ref().display()))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply journal schema")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory journal")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply journal schema")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn fresh(ts: f64) -> bool {
        (ts - now_ts()).abs() < FRESHNESS_SEC
    }

    pub fn store_unified(&self, allowlist: &SymbolUniverse, tick: &UnifiedTick) -> Result<()> {
        if !allowlist.contains(&tick.symbol) || !Self::fresh(tick.timestamp) {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO unified_ticks (ts, sym, price, mark, funding, oi, spread, volume, bid_total, ask_total, imbalance)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?9, ?10)",
            params![
                tick.timestamp,
                tick.symbol.as_str(),
                tick.price,
                tick.mark,
                tick.funding,
                tick.oi,
                tick.spread,
                tick.bid_total,
                tick.ask_total,
                tick.imbalance,
            ],
        )?;
        Ok(())
    }

    pub fn store_features(
        &self,
        allowlist: &SymbolUniverse,
        symbol: &CanonicalSymbol,
        ts: f64,
        blob: &str,
    ) -> Result<()> {
        if !allowlist.contains(symbol) || !Self::fresh(ts) {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO features (ts, sym, data_blob) VALUES (?1, ?2, ?3)",
            params![ts, symbol.as_str(), blob],
        )?;
        Ok(())
    }

    pub fn store_rank(
        &self,
        allowlist: &SymbolUniverse,
        symbol: &CanonicalSymbol,
        ts: f64,
        score: f64,
    ) -> Result<()> {
        if !allowlist.contains(symbol) || !Self::fresh(ts) {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ranks (ts, sym, score) VALUES (?1, ?2, ?3)",
            params![ts, symbol.as_str(), score],
        )?;
        Ok(())
    }

    pub fn store_signal(
        &self,
        allowlist: &SymbolUniverse,
        symbol: &CanonicalSymbol,
        score: f64,
        entry_price: f64,
        reason: &str,
        dedup_hash: &str,
        signal_type: SignalType,
    ) -> Result<()> {
        let ts = now_ts();
        if !allowlist.contains(symbol) || !Self::fresh(ts) {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO signals (ts, sym, score, entry_price, reason, dedup_hash, signal_type) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![ts, symbol.as_str(), score, entry_price, reason, dedup_hash, signal_type.to_string()],
        )?;
        Ok(())
    }

    pub fn seen_recent_signal(&self, symbol: &CanonicalSymbol, hash: &str, window_sec: u64) -> Result<bool> {
        let conn = self.conn.lock();
        let since = now_ts() - window_sec as f64;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM signals WHERE sym = ?1 AND dedup_hash = ?2 AND ts >= ?3",
            params![symbol.as_str(), hash, since],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn seen_recent_symbol_signal(&self, symbol: &CanonicalSymbol, window_sec: u64, signal_type: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let since = now_ts() - window_sec as f64;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM signals WHERE sym = ?1 AND signal_type = ?2 AND ts >= ?3",
            params![symbol.as_str(), signal_type, since],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_open_position(&self, symbol: &CanonicalSymbol) -> Result<Option<Position>> {
        let conn = self.conn.lock();
        let pos = conn
            .query_row(
                "SELECT sym, entry_ts, entry_price, status, best_low, exit_ts, exit_price, exit_reason, pnl_pct
                 FROM positions WHERE sym = ?1 AND status = 'OPEN' LIMIT 1",
                params![symbol.as_str()],
                row_to_position,
            )
            .optional()?;
        Ok(pos)
    }

    pub fn open_position(
        &self,
        allowlist: &SymbolUniverse,
        symbol: &CanonicalSymbol,
        entry_ts: f64,
        entry_price: f64,
    ) -> Result<()> {
        if !allowlist.contains(symbol) || !Self::fresh(entry_ts) {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO positions (sym, entry_ts, entry_price, status, best_low) VALUES (?1, ?2, ?3, 'OPEN', ?3)",
            params![symbol.as_str(), entry_ts, entry_price],
        )?;
        Ok(())
    }

    pub fn update_best_low(
        &self,
        allowlist: &SymbolUniverse,
        symbol: &CanonicalSymbol,
        best_low: f64,
    ) -> Result<()> {
        if !allowlist.contains(symbol) || !Self::fresh(now_ts()) {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE positions SET best_low = ?1 WHERE sym = ?2 AND status = 'OPEN'",
            params![best_low, symbol.as_str()],
        )?;
        Ok(())
    }

    pub fn close_position(
        &self,
        allowlist: &SymbolUniverse,
        symbol: &CanonicalSymbol,
        exit_ts: f64,
        exit_price: f64,
        exit_reason: &str,
        pnl_pct: f64,
    ) -> Result<()> {
        if !allowlist.contains(symbol) || !Self::fresh(exit_ts) {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE positions SET status = 'CLOSED', exit_ts = ?1, exit_price = ?2, exit_reason = ?3, pnl_pct = ?4
             WHERE sym = ?5 AND status = 'OPEN'",
            params![exit_ts, exit_price, exit_reason, pnl_pct, symbol.as_str()],
        )?;
        Ok(())
    }

    pub fn latest_unified(&self, symbol: &CanonicalSymbol) -> Result<Option<f64>> {
        let conn = self.conn.lock();
        let ts = conn
            .query_row(
                "SELECT ts FROM unified_ticks WHERE sym = ?1 ORDER BY ts DESC LIMIT 1",
                params![symbol.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ts)
    }

    pub fn prune_old(&self, days: f64) -> Result<()> {
        let cutoff = now_ts() - days * 86400.0;
        let conn = self.conn.lock();
        conn.execute("DELETE FROM unified_ticks WHERE ts < ?1", params![cutoff])?;
        conn.execute("DELETE FROM features WHERE ts < ?1", params![cutoff])?;
        conn.execute("DELETE FROM ranks WHERE ts < ?1", params![cutoff])?;
        conn.execute(
            "DELETE FROM signals WHERE ts < ?1 AND signal_type != 'entry'",
            params![cutoff],
        )?;
        Ok(())
    }
}

fn row_to_position(row: &rusqlite::Row<'_>) -> rusqlite::Result<Position> {
    let status_str: String = row.get(3)?;
    let status = if status_str == "OPEN" {
        PositionStatus::Open
    } else {
        PositionStatus::Closed
    };
    Ok(Position {
        symbol: CanonicalSymbol::new(&row.get::<_, String>(0)?),
        entry_ts: row.get(1)?,
        entry_price: row.get(2)?,
        status,
        best_low: row.get(4)?,
        exit_ts: row.get(5)?,
        exit_price: row.get(6)?,
        exit_reason: row.get(7)?,
        pnl_pct: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol() -> CanonicalSymbol {
        CanonicalSymbol::new("BTCUSDT")
    }

    fn allowlist() -> SymbolUniverse {
        SymbolUniverse::parse("BTCUSDT\n")
    }

    #[test]
    fn open_and_fetch_open_position() {
        let journal = Journal::open_in_memory().unwrap();
        let allow = allowlist();
        let sym = symbol();
        journal.open_position(&allow, &sym, now_ts(), 100.0).unwrap();
        let pos = journal.get_open_position(&sym).unwrap().unwrap();
        assert_eq!(pos.entry_price, 100.0);
        assert_eq!(pos.best_low, 100.0);
        assert_eq!(pos.status, PositionStatus::Open);
    }

    #[test]
    fn closing_position_clears_open_lookup() {
        let journal = Journal::open_in_memory().unwrap();
        let allow = allowlist();
        let sym = symbol();
        journal.open_position(&allow, &sym, now_ts(), 100.0).unwrap();
        journal
            .close_position(&allow, &sym, now_ts(), 98.0, "hard_stop", 2.0)
            .unwrap();
        assert!(journal.get_open_position(&sym).unwrap().is_none());
    }

    #[test]
    fn update_best_low_persists() {
        let journal = Journal::open_in_memory().unwrap();
        let allow = allowlist();
        let sym = symbol();
        journal.open_position(&allow, &sym, now_ts(), 100.0).unwrap();
        journal.update_best_low(&allow, &sym, 97.0).unwrap();
        let pos = journal.get_open_position(&sym).unwrap().unwrap();
        assert_eq!(pos.best_low, 97.0);
    }

    #[test]
    fn dedup_hash_seen_within_window() {
        let journal = Journal::open_in_memory().unwrap();
        let allow = allowlist();
        let sym = symbol();
        journal
            .store_signal(&allow, &sym, 70.0, 1.0, "entry", "abc123", SignalType::Entry)
            .unwrap();
        assert!(journal.seen_recent_signal(&sym, "abc123", 900).unwrap());
        assert!(!journal.seen_recent_signal(&sym, "other", 900).unwrap());
    }

    #[test]
    fn cooldown_checks_recent_entry_signal() {
        let journal = Journal::open_in_memory().unwrap();
        let allow = allowlist();
        let sym = symbol();
        assert!(!journal.seen_recent_symbol_signal(&sym, 300, "entry").unwrap());
        journal
            .store_signal(&allow, &sym, 70.0, 1.0, "entry", "h1", SignalType::Entry)
            .unwrap();
        assert!(journal.seen_recent_symbol_signal(&sym, 300, "entry").unwrap());
    }

    #[test]
    fn open_position_outside_allowlist_is_silently_dropped() {
        let journal = Journal::open_in_memory().unwrap();
        let allow = SymbolUniverse::parse("ETHUSDT\n");
        let sym = symbol();
        journal.open_position(&allow, &sym, now_ts(), 100.0).unwrap();
        assert!(journal.get_open_position(&sym).unwrap().is_none());
    }

    #[test]
    fn stale_tick_is_silently_dropped() {
        let journal = Journal::open_in_memory().unwrap();
        let universe = crate::symbol_universe::SymbolUniverse::parse("BTCUSDT\n");
        let tick = UnifiedTick {
            symbol: symbol(),
            timestamp: now_ts() - 10_000.0,
            price: Some(1.0),
            ..Default::default()
        };
        journal.store_unified(&universe, &tick).unwrap();
        assert!(journal.latest_unified(&symbol()).unwrap().is_none());
    }
}
