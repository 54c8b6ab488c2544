//! Pure per-runner guard arithmetic: bar advancement, re-entry cooldown,
//! budget-derived quantities, and trailing-percent selection. Kept free of IO
//! so every rule is testable bar-by-bar.

use chrono::{DateTime, Utc};
use sim_md::DAILY_TF_MIN;
use sim_strategy::{BuyDecision, RunnerView};

/// A bar "advanced" when there was no previous bar, or the new bar's
/// timestamp is strictly greater.
pub fn bar_advanced(prev_bar_ts: Option<DateTime<Utc>>, last_ts: Option<DateTime<Utc>>) -> bool {
    match (prev_bar_ts, last_ts) {
        (None, _) => true,
        (Some(prev), Some(last)) => last > prev,
        (Some(_), None) => false,
    }
}

/// Cooldown accounting for one tick: a broker stop-exit rearms the counter,
/// then one unit is consumed per advanced bar. BUYs stay blocked while the
/// result is positive.
pub fn next_cooldown(
    current: u32,
    stop_exit_this_tick: bool,
    advanced: bool,
    cooldown_after_stop_bars: u32,
) -> u32 {
    let mut cd = if stop_exit_this_tick {
        cooldown_after_stop_bars
    } else {
        current
    };
    if advanced && cd > 0 {
        cd -= 1;
    }
    cd
}

/// Position size from the fixed per-runner unit budget when the strategy
/// does not supply a quantity.
pub fn qty_from_budget(unit_budget: f64, price: f64) -> i64 {
    if !(price.is_finite() && unit_budget.is_finite()) || unit_budget <= 0.0 {
        return 0;
    }
    (unit_budget / price.max(0.01)).floor().max(0.0) as i64
}

/// Trailing percent armed at BUY: the maximum of the strategy-supplied
/// percent, the runner's `trailing_stop_percent` parameter, and (intraday
/// only) the configured floor.
pub fn choose_trail_pct(
    decision: &BuyDecision,
    runner: &RunnerView,
    tf_min: u32,
    min_intraday_trail_pct: f64,
) -> f64 {
    let strategy_trail = decision
        .trail_stop
        .as_ref()
        .and_then(|t| t.trailing_percent)
        .filter(|p| *p > 0.0)
        .unwrap_or(0.0);
    let param_trail = runner.param_f64("trailing_stop_percent", 0.0).max(0.0);
    let mut trail = strategy_trail.max(param_trail);
    if tf_min < DAILY_TF_MIN && min_intraday_trail_pct > 0.0 {
        trail = trail.max(min_intraday_trail_pct);
    }
    trail
}

/// Whether a non-advanced bar is folded into the per-tick summary (true) or
/// recorded as its own execution row (false).
pub fn same_bar_goes_to_summary(tf_min: u32, summarize: bool, suppress_daily: bool) -> bool {
    if !summarize {
        return false;
    }
    // Daily rows are recorded individually only when explicitly enabled.
    !(tf_min >= DAILY_TF_MIN && !suppress_daily)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use sim_strategy::{parse_decision, Decision, ValidationEnv};

    fn ts(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 4, 14, 30, 0).unwrap() + chrono::Duration::minutes(min)
    }

    fn runner_with(params: serde_json::Value) -> RunnerView {
        RunnerView {
            id: 1,
            user_id: 1,
            name: "x".to_string(),
            strategy: "below_above".to_string(),
            stock: "AAPL".to_string(),
            time_frame: 5,
            parameters: params,
            budget: 10_000.0,
            current_budget: 10_000.0,
            exit_strategy: "hold_forever".to_string(),
            activation: "active".to_string(),
            time_range_from: None,
            time_range_to: None,
        }
    }

    fn buy_decision(raw: serde_json::Value) -> BuyDecision {
        match parse_decision(&raw, false, ValidationEnv::Analytics).unwrap() {
            Decision::Buy(b) => b,
            other => panic!("expected Buy, got {other:?}"),
        }
    }

    #[test]
    fn first_bar_always_advances() {
        assert!(bar_advanced(None, Some(ts(0))));
        assert!(bar_advanced(None, None));
    }

    #[test]
    fn same_or_older_bar_does_not_advance() {
        assert!(!bar_advanced(Some(ts(5)), Some(ts(5))));
        assert!(!bar_advanced(Some(ts(5)), Some(ts(0))));
        assert!(bar_advanced(Some(ts(0)), Some(ts(5))));
    }

    #[test]
    fn cooldown_blocks_for_configured_advanced_bars() {
        // Stop exit on bar b (which itself advanced): 3 -> 2.
        let mut cd = next_cooldown(0, true, true, 3);
        assert_eq!(cd, 2);
        // Two more advanced bars drain it.
        cd = next_cooldown(cd, false, true, 3);
        assert_eq!(cd, 1);
        cd = next_cooldown(cd, false, true, 3);
        assert_eq!(cd, 0);
    }

    #[test]
    fn cooldown_does_not_decrement_on_same_bar() {
        let cd = next_cooldown(2, false, false, 3);
        assert_eq!(cd, 2);
    }

    #[test]
    fn qty_from_budget_floors_and_clamps() {
        assert_eq!(qty_from_budget(2000.0, 99.0), 20);
        assert_eq!(qty_from_budget(2000.0, 2001.0), 0);
        // Price floor of one cent guards absurd quantities.
        assert_eq!(qty_from_budget(2000.0, 0.0001), 200_000);
        assert_eq!(qty_from_budget(0.0, 10.0), 0);
        assert_eq!(qty_from_budget(f64::NAN, 10.0), 0);
    }

    #[test]
    fn widest_trail_of_strategy_and_parameter_wins() {
        let d = buy_decision(json!({
            "action": "BUY",
            "trail_stop_order": {"trailing_percent": 4.0}
        }));
        let r = runner_with(json!({"trailing_stop_percent": 2.0}));
        assert_eq!(choose_trail_pct(&d, &r, 5, 1.25), 4.0);

        let wider_param = runner_with(json!({"trailing_stop_percent": 6.0}));
        assert_eq!(choose_trail_pct(&d, &wider_param, 5, 1.25), 6.0);
    }

    #[test]
    fn parameter_trail_used_when_strategy_silent() {
        let d = buy_decision(json!({"action": "BUY"}));
        let r = runner_with(json!({"trailing_stop_percent": 2.0}));
        assert_eq!(choose_trail_pct(&d, &r, 5, 1.25), 2.0);
    }

    #[test]
    fn intraday_floor_applies_but_not_daily() {
        let d = buy_decision(json!({"action": "BUY"}));
        let r = runner_with(json!({"trailing_stop_percent": 0.5}));
        assert_eq!(choose_trail_pct(&d, &r, 5, 1.25), 1.25);
        assert_eq!(choose_trail_pct(&d, &r, 1440, 1.25), 0.5);
    }

    #[test]
    fn no_trail_configured_stays_zero_on_daily() {
        let d = buy_decision(json!({"action": "BUY"}));
        let r = runner_with(json!({}));
        assert_eq!(choose_trail_pct(&d, &r, 1440, 1.25), 0.0);
        // Intraday still gets the floor.
        assert_eq!(choose_trail_pct(&d, &r, 5, 1.25), 1.25);
    }

    #[test]
    fn same_bar_summary_policy() {
        // Intraday with summarization: summary.
        assert!(same_bar_goes_to_summary(5, true, true));
        // Daily suppressed (default): summary.
        assert!(same_bar_goes_to_summary(1440, true, true));
        // Daily rows explicitly enabled: own row.
        assert!(!same_bar_goes_to_summary(1440, true, false));
        // Summarization off: always own row.
        assert!(!same_bar_goes_to_summary(5, false, true));
    }
}
