// =============================================================================
// Shared bookkeeping used by every venue adapter: staleness map + skip-set
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use parking_lot::RwLock;

use crate::types::now_ts;

#[derive(Default)]
pub struct StreamHealth {
    last_message_at: RwLock<HashMap<String, Instant>>,
}

impl StreamHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&self, stream_key: &str) {
        self.last_message_at
            .write()
            .insert(stream_key.to_string(), Instant::now());
    }

    /// Streams whose last message is older than 60s.
    pub fn stale(&self) -> HashMap<String, f64> {
        let now = Instant::now();
        self.last_message_at
            .read()
            .iter()
            .filter_map(|(k, t)| {
                let age = now.duration_since(*t).as_secs_f64();
                (age > 60.0).then_some((k.clone(), age))
            })
            .collect()
    }
}

/// Suppresses REST polling for symbols that repeatedly 4xx on a venue.
#[derive(Default)]
pub struct SkipSet {
    skipped: RwLock<HashSet<String>>,
}

impl SkipSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, symbol_local: &str) {
        self.skipped.write().insert(symbol_local.to_string());
    }

    pub fn is_skipped(&self, symbol_local: &str) -> bool {
        self.skipped.read().contains(symbol_local)
    }
}

/// A bounded window of "observed on WS" symbols, advanced each REST poll
/// cycle so that funding/OI polling never cold-lists the whole universe.
pub struct PollWindow {
    cursor: RwLock<usize>,
}

impl PollWindow {
    pub fn new() -> Self {
        Self {
            cursor: RwLock::new(0),
        }
    }

    pub fn next_slice<'a>(&self, observed: &'a [String], max: usize) -> Vec<&'a str> {
        if observed.is_empty() {
            return Vec::new();
        }
        let mut cursor = self.cursor.write();
        let n = observed.len();
        let take = max.min(n);
        let mut out = Vec::with_capacity(take);
        for i in 0..take {
            out.push(observed[(*cursor + i) % n].as_str());
        }
        *cursor = (*cursor + take) % n;
        out
    }
}

impl Default for PollWindow {
    fn default() -> Self {
        Self::new()
    }
}

pub fn timestamp_fresh(ts: f64) -> bool {
    (ts - now_ts()).abs() < 300.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_health_reports_stale_after_touch_expires() {
        let health = StreamHealth::new();
        health.touch("btcusdt@depth");
        assert!(health.stale().is_empty());
    }

    #[test]
    fn skip_set_tracks_marked_symbols() {
        let skip = SkipSet::new();
        assert!(!skip.is_skipped("btcusdt"));
        skip.mark("btcusdt");
        assert!(skip.is_skipped("btcusdt"));
    }

    #[test]
    fn poll_window_wraps_and_advances() {
        let window = PollWindow::new();
        let observed: Vec<String> = vec!["a", "b", "c", "d", "e"]
            .into_iter()
            .map(String::from)
            .collect();
        let first = window.next_slice(&observed, 2);
        assert_eq!(first, vec!["a", "b"]);
        let second = window.next_slice(&observed, 2);
        assert_eq!(second, vec!["c", "d"]);
        let third = window.next_slice(&observed, 2);
        assert_eq!(third, vec!["e", "a"]);
    }
}
