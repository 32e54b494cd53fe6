// =============================================================================
// Status — read-only snapshot of the journal's health and top-ranked symbols
// =============================================================================
//
// Opens its own read-only connection to the journal SQLite file; the
// running engine keeps its own single writer connection and never shares it
// with this tool.
// =============================================================================

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};

const DEFAULT_LOOKBACK_SEC: f64 = 600.0;
const DEFAULT_SCAN_ROWS: i64 = 5000;
const DEFAULT_TOP_N: usize = 5;

fn now_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn main() -> Result<()> {
    let journal_path = std::env::var("JOURNAL_PATH").unwrap_or_else(|_| "data.db".to_string());
    let path = PathBuf::from(&journal_path);

    let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open journal read-only at {}", path.display()))?;

    println!("journal: {}", path.display());

    print_row_counts(&conn)?;
    print_freshness(&conn)?;
    print_top_symbols(&conn, DEFAULT_LOOKBACK_SEC, DEFAULT_SCAN_ROWS, DEFAULT_TOP_N)?;

    Ok(())
}

fn print_row_counts(conn: &Connection) -> Result<()> {
    println!("\n-- row counts --");
    for table in ["unified_ticks", "features", "signals", "positions", "ranks"] {
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .with_context(|| format!("failed to count rows in {table}"))?;
        println!("{table:<16} {count}");
    }
    Ok(())
}

fn print_freshness(conn: &Connection) -> Result<()> {
    println!("\n-- freshness --");
    let latest_tick: Option<f64> = conn
        .query_row("SELECT MAX(ts) FROM unified_ticks", [], |row| row.get(0))
        .unwrap_or(None);
    match latest_tick {
        Some(ts) => println!("latest unified tick: {:.1}s ago", now_ts() - ts),
        None => println!("latest unified tick: none recorded"),
    }

    let latest_features: Option<f64> = conn
        .query_row("SELECT MAX(ts) FROM features", [], |row| row.get(0))
        .unwrap_or(None);
    match latest_features {
        Some(ts) => println!("latest features row: {:.1}s ago", now_ts() - ts),
        None => println!("latest features row: none recorded"),
    }

    let open_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM positions WHERE status = 'OPEN'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);
    println!("open positions: {open_count}");
    Ok(())
}

fn print_top_symbols(conn: &Connection, lookback_sec: f64, scan_rows: i64, top_n: usize) -> Result<()> {
    println!("\n-- top {top_n} symbols by avg score (last {lookback_sec:.0}s, scanning up to {scan_rows} rows) --");
    let since = now_ts() - lookback_sec;

    let mut stmt = conn.prepare(
        "SELECT sym, AVG(score) as avg_score, COUNT(*) as n
         FROM (SELECT sym, score FROM ranks WHERE ts >= ?1 ORDER BY ts DESC LIMIT ?2)
         GROUP BY sym
         ORDER BY avg_score DESC
         LIMIT ?3",
    )?;

    let rows = stmt.query_map(
        rusqlite::params![since, scan_rows, top_n as i64],
        |row| {
            let sym: String = row.get(0)?;
            let avg_score: f64 = row.get(1)?;
            let n: i64 = row.get(2)?;
            Ok((sym, avg_score, n))
        },
    )?;

    for row in rows {
        let (sym, avg_score, n) = row?;
        println!("{sym:<14} avg_score={avg_score:6.1}  samples={n}");
    }
    Ok(())
}
