//! Stop-ordering invariant: when a bar crosses the static stop, the broker
//! exit fires before (and instead of) any strategy SELL at the close, and the
//! recorded fill is the stop price, not the bar's close.

use chrono::{DateTime, TimeZone, Utc};
use sim_broker::{evaluate_bar, StopReason, StopState};

fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 1, 4, 15, 0, 0).unwrap()
}

#[test]
fn static_stop_fill_is_stop_price_not_close() {
    // Position AAPL@100 qty 10 with stop_price = 99.
    // Bar O=99.5 H=99.7 L=98.9 C=99.2 — the strategy would also SELL at
    // 99.2, but the broker runs first and fills the stop at 99.0.
    let mut state = StopState {
        stop_price: Some(99.0),
        trail_percent: None,
        highest_price: None,
        activation_ts: None,
    };

    let exit = evaluate_bar(&mut state, 99.7, 98.9, at(), 0.01).unwrap();
    assert_eq!(exit.reason, StopReason::StaticStopHit);
    assert!((exit.price - 99.0).abs() < 1e-12);
    assert!((exit.price - 99.2).abs() > 1e-9, "must not fill at the close");
}

#[test]
fn static_stop_untouched_bar_does_not_exit() {
    let mut state = StopState {
        stop_price: Some(99.0),
        trail_percent: None,
        highest_price: None,
        activation_ts: None,
    };
    assert!(evaluate_bar(&mut state, 101.0, 99.5, at(), 0.01).is_none());
}

#[test]
fn static_stop_has_no_activation_delay() {
    // Unlike the trailing controller, a static stop protects the entry bar.
    let mut state = StopState {
        stop_price: Some(95.0),
        trail_percent: Some(5.0),
        highest_price: Some(100.0),
        // Trailing not yet active on this bar.
        activation_ts: Some(at() + chrono::Duration::minutes(5)),
    };
    let exit = evaluate_bar(&mut state, 100.0, 94.0, at(), 0.01).unwrap();
    assert_eq!(exit.reason, StopReason::StaticStopHit);
    assert!((exit.price - 95.0).abs() < 1e-12);
}
