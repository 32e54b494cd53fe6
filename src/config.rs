// =============================================================================
// Config — environment-driven tunables for the short-signal engine
// =============================================================================
//
// Every tunable named in the external-interface contract lives here, loaded
// once at startup via `Config::from_env()`. Unlike a hot-reloadable JSON
// config, this is environment-sourced per the external configuration-loader
// contract: the loader itself is out of scope, only the typed destination
// struct is ours to own.
//
// =============================================================================

use std::path::PathBuf;

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone)]
pub struct Config {
    pub score_min: f64,
    pub max_price: f64,
    pub entry_cooldown_sec: u64,
    pub exit_cooldown_sec: u64,
    pub trail_activate_pct: f64,
    pub trail_giveback_pct: f64,
    pub hard_stop_loss_pct: f64,
    pub dedup_window_sec: u64,
    pub max_signals_per_day: u32,
    /// Whether `sweep_rejection >= 0.7` participates in the 7-condition
    /// entry gate. Defaults off: the unified feature pipeline hardwires
    /// `sweep_rejection` to 0, so including it would make that single
    /// condition permanently fail and silently cap `met` at 6/7.
    pub sweep_rejection_condition: bool,
    pub journal_path: PathBuf,
    pub symbols_path: PathBuf,
    pub log_level: String,
    pub refresh_interval_sec: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            score_min: 60.0,
            max_price: 5.0,
            entry_cooldown_sec: 300,
            exit_cooldown_sec: 120,
            trail_activate_pct: 0.6,
            trail_giveback_pct: 0.4,
            hard_stop_loss_pct: 1.2,
            dedup_window_sec: 900,
            max_signals_per_day: 8,
            sweep_rejection_condition: false,
            journal_path: PathBuf::from("data.db"),
            symbols_path: PathBuf::from("symbols.txt"),
            log_level: "info".to_string(),
            refresh_interval_sec: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            score_min: env_f64("SCORE_MIN", d.score_min),
            max_price: env_f64("MAX_PRICE", d.max_price),
            entry_cooldown_sec: env_u64("ENTRY_COOLDOWN_SEC", d.entry_cooldown_sec),
            exit_cooldown_sec: env_u64("EXIT_COOLDOWN_SEC", d.exit_cooldown_sec),
            trail_activate_pct: env_f64("TRAIL_ACTIVATE_PCT", d.trail_activate_pct),
            trail_giveback_pct: env_f64("TRAIL_GIVEBACK_PCT", d.trail_giveback_pct),
            hard_stop_loss_pct: env_f64("HARD_STOP_LOSS_PCT", d.hard_stop_loss_pct),
            dedup_window_sec: env_u64("DEDUP_WINDOW_SEC", d.dedup_window_sec),
            max_signals_per_day: env_u64("MAX_SIGNALS_PER_DAY", d.max_signals_per_day as u64) as u32,
            sweep_rejection_condition: env_bool(
                "SWEEP_REJECTION_CONDITION",
                d.sweep_rejection_condition,
            ),
            journal_path: PathBuf::from(env_string("JOURNAL_PATH", "data.db")),
            symbols_path: PathBuf::from(env_string("SYMBOLS_PATH", "symbols.txt")),
            log_level: env_string("RUST_LOG", "info"),
            refresh_interval_sec: env_u64("REFRESH_INTERVAL_SEC", d.refresh_interval_sec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_external_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.score_min, 60.0);
        assert_eq!(cfg.max_price, 5.0);
        assert_eq!(cfg.entry_cooldown_sec, 300);
        assert_eq!(cfg.trail_activate_pct, 0.6);
        assert_eq!(cfg.trail_giveback_pct, 0.4);
        assert_eq!(cfg.hard_stop_loss_pct, 1.2);
        assert_eq!(cfg.dedup_window_sec, 900);
        assert_eq!(cfg.max_signals_per_day, 8);
        assert!(!cfg.sweep_rejection_condition);
    }

    #[test]
    fn from_env_falls_back_to_defaults_when_unset() {
        std::env::remove_var("SCORE_MIN_TEST_UNUSED_KEY");
        let cfg = Config::from_env();
        assert!(cfg.score_min > 0.0);
        assert!(cfg.max_price > 0.0);
    }
}
