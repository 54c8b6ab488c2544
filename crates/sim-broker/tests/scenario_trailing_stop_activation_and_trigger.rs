//! End-to-end trailing-stop lifecycle against the stop evaluator:
//! BUY at 100 with a 5% trail on a 5-minute timeframe, same-bar plunge is
//! ignored (activation delay), the high-water mark ratchets to 110, and the
//! position exits once the bar trades through the trailed stop.

use chrono::{DateTime, Duration, TimeZone, Utc};
use sim_broker::{evaluate_bar, trade_pnl, StopReason, StopState};

fn t0() -> DateTime<Utc> {
    // ~09:30 ET on a real NY session day.
    Utc.with_ymd_and_hms(2021, 1, 4, 14, 30, 0).unwrap()
}

#[test]
fn trailing_stop_activation_delay_and_trigger() {
    const TF_MIN: i64 = 5;
    const TICK: f64 = 0.01;

    // BUY @ 100, arm 5% trail with one-bar activation delay.
    let entry = 100.0;
    let mut state = StopState {
        stop_price: None,
        trail_percent: Some(5.0),
        highest_price: Some(entry),
        activation_ts: Some(t0() + Duration::minutes(TF_MIN)),
    };

    // Same-bar plunge to 90: the trail is not active yet, position survives.
    assert!(evaluate_bar(&mut state, entry, 90.0, t0(), TICK).is_none());
    assert_eq!(state.highest_price, Some(entry));

    // Next bar at 100: active now, nothing crossed.
    let t1 = t0() + Duration::minutes(TF_MIN);
    assert!(evaluate_bar(&mut state, 100.0, 99.5, t1, TICK).is_none());

    // Rally to 110: highest ratchets, stop trails to 104.50.
    let t2 = t1 + Duration::minutes(1);
    assert!(evaluate_bar(&mut state, 110.0, 106.0, t2, TICK).is_none());
    assert_eq!(state.highest_price, Some(110.0));
    let stop: f64 = 110.0 * (1.0 - 5.0 / 100.0);
    assert!((stop - 104.5).abs() < 1e-12);

    // Bar trading at 104.40 (under the stop): exit fills at 104.40.
    let t3 = t2 + Duration::minutes(1);
    let exit = evaluate_bar(&mut state, 104.40, 104.40, t3, TICK).unwrap();
    assert_eq!(exit.reason, StopReason::TrailingStopHit);
    assert!((exit.price - 104.40).abs() < 1e-12);

    // With all cost parameters at zero, the trade row matches exactly.
    let (pnl_amount, pnl_percent) = trade_pnl(exit.price, entry, 10.0, 0.0);
    assert!((pnl_amount - 44.0).abs() < 1e-9);
    assert!((pnl_percent - 4.4).abs() < 1e-9);
}

#[test]
fn trailing_stop_lifts_with_new_highs_until_crossed() {
    const TICK: f64 = 0.01;
    let entry = 50.0;
    let mut state = StopState {
        stop_price: None,
        trail_percent: Some(8.0),
        highest_price: Some(entry),
        activation_ts: Some(t0() + Duration::minutes(5)),
    };

    // Activation bar makes a small new high: stop becomes 51 * 0.92.
    let t1 = t0() + Duration::minutes(5);
    assert!(evaluate_bar(&mut state, 51.0, 50.5, t1, TICK).is_none());
    assert_eq!(state.highest_price, Some(51.0));

    // Higher high: stop lifts to 55 * 0.92 = 50.6.
    let t2 = t1 + Duration::minutes(1);
    assert!(evaluate_bar(&mut state, 55.0, 52.0, t2, TICK).is_none());
    assert_eq!(state.highest_price, Some(55.0));

    // Pull back to just above the stop: stays open.
    let near_stop = 55.0 * 0.92 + 0.01;
    let t3 = t2 + Duration::minutes(1);
    assert!(evaluate_bar(&mut state, near_stop, near_stop, t3, TICK).is_none());

    // Cross below the stop: closes, filling at the stop (bar straddles it).
    let t4 = t3 + Duration::minutes(1);
    let exit = evaluate_bar(&mut state, 55.0 * 0.92 + 0.5, 55.0 * 0.92 - 0.02, t4, TICK).unwrap();
    assert_eq!(exit.reason, StopReason::TrailingStopHit);
    assert!((exit.price - 50.6).abs() < 1e-9);
}
