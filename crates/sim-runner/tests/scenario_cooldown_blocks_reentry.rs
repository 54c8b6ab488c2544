//! Cooldown invariant: after a broker-driven exit on a runner at bar b, no
//! BUY may be accepted until the configured number of *advanced* bars have
//! passed. Ticks that see the same bar again consume nothing.

use chrono::{DateTime, Duration, TimeZone, Utc};
use sim_runner::guards::{bar_advanced, next_cooldown};

const COOLDOWN_BARS: u32 = 3;

fn bar(min: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 1, 4, 14, 30, 0).unwrap() + Duration::minutes(min)
}

#[test]
fn cooldown_counts_advanced_bars_only() {
    // Stop exit fires on the bar at minute 10 (an advanced bar).
    let mut prev = Some(bar(5));
    let mut cd = 0u32;

    let advanced = bar_advanced(prev, Some(bar(10)));
    assert!(advanced);
    cd = next_cooldown(cd, true, advanced, COOLDOWN_BARS);
    prev = Some(bar(10));
    assert!(cd > 0, "BUY must be blocked right after the stop-out");

    // Two ticks replaying the same bar: nothing is consumed.
    for _ in 0..2 {
        let advanced = bar_advanced(prev, Some(bar(10)));
        assert!(!advanced);
        cd = next_cooldown(cd, false, advanced, COOLDOWN_BARS);
        assert_eq!(cd, COOLDOWN_BARS - 1);
    }

    // Advancing bars drain the remainder.
    let advanced = bar_advanced(prev, Some(bar(15)));
    cd = next_cooldown(cd, false, advanced, COOLDOWN_BARS);
    prev = Some(bar(15));
    assert_eq!(cd, 1);

    let advanced = bar_advanced(prev, Some(bar(20)));
    cd = next_cooldown(cd, false, advanced, COOLDOWN_BARS);
    assert_eq!(cd, 0, "BUY becomes eligible only now");
}

#[test]
fn new_stop_exit_rearms_a_draining_cooldown() {
    // One advanced bar into the first cooldown, a second stop-out resets it.
    let mut cd = next_cooldown(0, true, true, COOLDOWN_BARS);
    assert_eq!(cd, COOLDOWN_BARS - 1);

    cd = next_cooldown(cd, true, true, COOLDOWN_BARS);
    assert_eq!(cd, COOLDOWN_BARS - 1);
}
