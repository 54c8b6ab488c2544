//! Per-(symbol, timeframe) health FSM with TTL auto-exclude.
//!
//! Transitions:
//! ```text
//!   HEALTHY  → DEGRADED   when ≥ degrade_threshold consecutive no-data/errors
//!   *        → EXCLUDED   when incident count over the last `window_days` ET
//!                         days reaches `exclude_threshold_sessions`
//!   *        → EXCLUDED   immediately on a coverage gap (earliest bar after
//!                         sim start, or no bars at all)
//!   EXCLUDED → HEALTHY    once `excluded_until` passes; counters reset
//! ```
//!
//! The map is process-local and deliberately not persisted: the coverage scan
//! reruns on restart and incident pressure rebuilds within a window.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use sim_config::HealthConfig;
use tracing::info;

/// FSM state for one (symbol, timeframe) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairHealth {
    Healthy,
    Degraded,
    Excluded,
}

#[derive(Clone, Debug)]
pub struct PairState {
    pub state: PairHealth,
    pub reason: Option<String>,
    pub consecutive_no_data: u32,
    pub consecutive_errors: u32,
    /// Incident count per ET day, pruned to the trailing window.
    pub day_counts: BTreeMap<NaiveDate, u32>,
    pub excluded_until: Option<DateTime<Utc>>,
    /// Provider earliest at coverage-exclusion time, for diagnostics.
    pub first_seen_earliest: Option<DateTime<Utc>>,
}

impl Default for PairState {
    fn default() -> Self {
        Self {
            state: PairHealth::Healthy,
            reason: None,
            consecutive_no_data: 0,
            consecutive_errors: 0,
            day_counts: BTreeMap::new(),
            excluded_until: None,
            first_seen_earliest: None,
        }
    }
}

/// TTL-bounded quarantine for symbols producing excessive no-data/error
/// signals. All decisions are pair-scoped on `(upper(symbol), tf_min)`.
pub struct HealthGate {
    cfg: HealthConfig,
    pairs: HashMap<(String, u32), PairState>,
    bootstrapped: bool,
}

impl HealthGate {
    pub fn new(cfg: HealthConfig) -> Self {
        Self {
            cfg,
            pairs: HashMap::new(),
            bootstrapped: false,
        }
    }

    fn entry(&mut self, sym: &str, tf: u32) -> &mut PairState {
        self.pairs
            .entry((sym.to_uppercase(), tf))
            .or_default()
    }

    /// Exclusion check with TTL re-admission: when the TTL has lapsed the
    /// pair flips back to HEALTHY and both consecutive counters reset.
    pub fn is_excluded(&mut self, sym: &str, tf: u32, now: DateTime<Utc>) -> (bool, Option<String>) {
        let st = self.entry(sym, tf);
        if st.state != PairHealth::Excluded {
            return (false, None);
        }
        if let Some(until) = st.excluded_until {
            if now >= until {
                st.state = PairHealth::Healthy;
                st.reason = None;
                st.consecutive_no_data = 0;
                st.consecutive_errors = 0;
                return (false, None);
            }
        }
        (true, Some(st.reason.clone().unwrap_or_else(|| "excluded".to_string())))
    }

    pub fn state_of(&self, sym: &str, tf: u32) -> PairHealth {
        self.pairs
            .get(&(sym.to_uppercase(), tf))
            .map(|s| s.state)
            .unwrap_or(PairHealth::Healthy)
    }

    /// Record a no-data incident for `et_day` and run the transition rules.
    pub fn note_no_data(&mut self, sym: &str, tf: u32, now: DateTime<Utc>, et_day: NaiveDate) {
        let deg = self.cfg.degrade_threshold;
        let st = self.entry(sym, tf);
        st.consecutive_no_data += 1;
        if st.consecutive_no_data >= deg && st.state == PairHealth::Healthy {
            st.state = PairHealth::Degraded;
            st.reason = Some("no_data".to_string());
        }
        self.bump_day(sym, tf, now, et_day);
    }

    /// Record an error incident for `et_day` and run the transition rules.
    pub fn note_error(&mut self, sym: &str, tf: u32, now: DateTime<Utc>, et_day: NaiveDate) {
        let deg = self.cfg.degrade_threshold;
        let st = self.entry(sym, tf);
        st.consecutive_errors += 1;
        if st.consecutive_errors >= deg && st.state == PairHealth::Healthy {
            st.state = PairHealth::Degraded;
            st.reason = Some("errors".to_string());
        }
        self.bump_day(sym, tf, now, et_day);
    }

    fn bump_day(&mut self, sym: &str, tf: u32, now: DateTime<Utc>, et_day: NaiveDate) {
        let window = self.cfg.window_days;
        let exclude_at = self.cfg.exclude_threshold_sessions;
        let ttl = self.cfg.ttl_days;

        let st = self.entry(sym, tf);
        *st.day_counts.entry(et_day).or_insert(0) += 1;

        // Prune to the trailing window (+2 slack so a slow day roll cannot
        // drop counts that still matter).
        while st.day_counts.len() > window + 2 {
            let oldest = *st.day_counts.keys().next().expect("non-empty");
            st.day_counts.remove(&oldest);
        }

        let recent: u32 = st
            .day_counts
            .iter()
            .rev()
            .take(window)
            .map(|(_, n)| *n)
            .sum();

        if recent >= exclude_at
            && matches!(st.state, PairHealth::Healthy | PairHealth::Degraded)
        {
            st.state = PairHealth::Excluded;
            st.reason = Some("errors_over_sessions".to_string());
            st.excluded_until = Some(now + Duration::days(ttl));
            info!(
                symbol = %sym.to_uppercase(),
                tf_min = tf,
                incidents = recent,
                "health gate: EXCLUDED (incident pressure), ttl_days={}",
                ttl
            );
        }
    }

    /// Exclude immediately because coverage is impossible for this run
    /// (provider earliest after sim start, or no bars at all).
    pub fn exclude_coverage(
        &mut self,
        sym: &str,
        tf: u32,
        earliest: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        let ttl = self.cfg.ttl_days;
        let st = self.entry(sym, tf);
        st.first_seen_earliest = earliest;
        st.state = PairHealth::Excluded;
        st.reason = Some("coverage".to_string());
        st.excluded_until = Some(now + Duration::days(ttl));
    }

    /// Reset the consecutive counters after a clean pass.
    pub fn mark_clean_pass(&mut self, sym: &str, tf: u32) {
        let st = self.entry(sym, tf);
        st.consecutive_no_data = 0;
        st.consecutive_errors = 0;
    }

    /// One-shot latch for the coverage scan the engine runs on its first
    /// tick. Returns true exactly once.
    pub fn begin_bootstrap(&mut self) -> bool {
        if self.bootstrapped {
            return false;
        }
        self.bootstrapped = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn gate() -> HealthGate {
        HealthGate::new(HealthConfig::default())
    }

    fn at(day: u32) -> (DateTime<Utc>, NaiveDate) {
        let now = Utc.with_ymd_and_hms(2021, 3, day, 15, 0, 0).unwrap();
        (now, NaiveDate::from_ymd_opt(2021, 3, day).unwrap())
    }

    #[test]
    fn three_consecutive_no_data_degrades() {
        let mut g = gate();
        let (now, day) = at(1);
        g.note_no_data("AAPL", 5, now, day);
        g.note_no_data("AAPL", 5, now, day);
        assert_eq!(g.state_of("AAPL", 5), PairHealth::Healthy);
        g.note_no_data("AAPL", 5, now, day);
        assert_eq!(g.state_of("AAPL", 5), PairHealth::Degraded);
    }

    #[test]
    fn clean_pass_resets_consecutive_counters() {
        let mut g = gate();
        let (now, day) = at(1);
        g.note_no_data("msft", 5, now, day);
        g.note_no_data("MSFT", 5, now, day);
        g.mark_clean_pass("MSFT", 5);
        g.note_no_data("MSFT", 5, now, day);
        // Two + reset + one never reaches the degrade threshold.
        assert_eq!(g.state_of("MSFT", 5), PairHealth::Healthy);
    }

    #[test]
    fn exactly_threshold_incidents_over_window_excludes() {
        let mut g = gate();
        // 9 incidents spread over the window: still not excluded.
        for i in 0..9u32 {
            let (now, day) = at(1 + (i % 5));
            g.note_error("TSLA", 5, now, day);
        }
        assert_ne!(g.state_of("TSLA", 5), PairHealth::Excluded);

        // The 10th crosses the line.
        let (now, day) = at(5);
        g.note_error("TSLA", 5, now, day);
        assert_eq!(g.state_of("TSLA", 5), PairHealth::Excluded);
        let (excluded, reason) = g.is_excluded("TSLA", 5, now);
        assert!(excluded);
        assert_eq!(reason.as_deref(), Some("errors_over_sessions"));
    }

    #[test]
    fn ttl_expiry_readmits_and_resets() {
        let mut g = HealthGate::new(HealthConfig {
            ttl_days: 1,
            ..HealthConfig::default()
        });
        let (t0, _) = at(1);
        g.exclude_coverage("CMCSA", 5, None, t0);
        assert!(g.is_excluded("CMCSA", 5, t0).0);

        let t1 = t0 + Duration::days(1);
        let (excluded, reason) = g.is_excluded("CMCSA", 5, t1);
        assert!(!excluded);
        assert_eq!(reason, None);
        assert_eq!(g.state_of("CMCSA", 5), PairHealth::Healthy);
    }

    #[test]
    fn coverage_exclusion_is_immediate() {
        let mut g = gate();
        let (now, _) = at(2);
        g.exclude_coverage("ABNB", 5, None, now);
        let (excluded, reason) = g.is_excluded("ABNB", 5, now);
        assert!(excluded);
        assert_eq!(reason.as_deref(), Some("coverage"));
    }

    #[test]
    fn day_counts_are_pruned_to_window_plus_two() {
        let mut g = gate();
        for d in 1..=15u32 {
            let (now, day) = at(d);
            g.note_no_data("NVDA", 1440, now, day);
        }
        let st = g.pairs.get(&("NVDA".to_string(), 1440)).unwrap();
        assert!(st.day_counts.len() <= 7);
    }

    #[test]
    fn pairs_are_scoped_by_timeframe() {
        let mut g = gate();
        let (now, day) = at(1);
        for _ in 0..10 {
            g.note_error("AMD", 5, now, day);
        }
        assert_eq!(g.state_of("AMD", 5), PairHealth::Excluded);
        assert_eq!(g.state_of("AMD", 1440), PairHealth::Healthy);
    }

    #[test]
    fn bootstrap_latch_fires_once() {
        let mut g = gate();
        assert!(g.begin_bootstrap());
        assert!(!g.begin_bootstrap());
    }
}
