//! Pure stop arithmetic, kept separate from the DB plumbing so the OHLC
//! semantics are testable bar-by-bar.
//!
//! Evaluation order on every bar: static stop first, then the trailing stop
//! (only once its activation instant has passed). The recorded exit price is
//! the stop level clamped into the bar's range — a bar that gapped entirely
//! below the stop fills at its high, not at a level the market never traded.

use chrono::{DateTime, Utc};

/// Fractional tolerance on stop crossings (guards float dust, not ticks).
const CROSS_EPSILON_SCALE: f64 = 1e-9;

/// Quantize a price to the venue tick.
pub fn quantize(price: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        return price;
    }
    let steps = (price / tick).round();
    let q = steps * tick;
    (q * 1e6).round() / 1e6
}

/// Stop bookkeeping carried on the open position row.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StopState {
    pub stop_price: Option<f64>,
    pub trail_percent: Option<f64>,
    pub highest_price: Option<f64>,
    pub activation_ts: Option<DateTime<Utc>>,
}

/// A triggered protective exit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StopExit {
    pub price: f64,
    pub reason: StopReason,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    StaticStopHit,
    TrailingStopHit,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::StaticStopHit => "static_stop_hit",
            StopReason::TrailingStopHit => "trailing_stop_hit",
        }
    }
}

/// Evaluate one OHLC bar against the armed stops.
///
/// Mutates `state.highest_price` (ratchet) when the trailing leg is active.
/// Returns the exit when a stop crossed; the caller sells at `exit.price`.
pub fn evaluate_bar(
    state: &mut StopState,
    high: f64,
    low: f64,
    at: DateTime<Utc>,
    tick: f64,
) -> Option<StopExit> {
    let epsilon = tick * CROSS_EPSILON_SCALE;

    // 1. Static stop: no activation delay.
    if let Some(sp) = state.stop_price.filter(|sp| *sp > 0.0) {
        if low <= sp + epsilon {
            return Some(StopExit {
                price: quantize(sp.min(high), tick),
                reason: StopReason::StaticStopHit,
            });
        }
    }

    // 2. Trailing stop: gated on the activation instant.
    let trail_pct = state.trail_percent.unwrap_or(0.0);
    if trail_pct > 0.0 {
        let active = match state.activation_ts {
            Some(activation) => at >= activation,
            None => true,
        };
        if active {
            let top = state.highest_price.unwrap_or(0.0).max(high);
            state.highest_price = Some(top);

            let trail_stop = top * (1.0 - trail_pct / 100.0);
            if low <= trail_stop + epsilon {
                return Some(StopExit {
                    price: quantize(trail_stop.min(high), tick),
                    reason: StopReason::TrailingStopHit,
                });
            }
        }
    }

    None
}

/// Round-trip P&L exactly as persisted on the trade row:
/// `(exec - avg) × qty - 2 × commission`; percent against cost basis.
pub fn trade_pnl(exec_price: f64, avg_price: f64, quantity: f64, commission: f64) -> (f64, f64) {
    let pnl_amount = (exec_price - avg_price) * quantity - 2.0 * commission;
    let cost_basis = avg_price * quantity;
    let pnl_percent = if cost_basis > 0.0 {
        pnl_amount / cost_basis * 100.0
    } else {
        0.0
    };
    (pnl_amount, pnl_percent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 4, 14, 30, 0).unwrap()
    }

    #[test]
    fn quantize_to_cents() {
        assert_eq!(quantize(104.503, 0.01), 104.5);
        assert_eq!(quantize(104.505, 0.01), 104.51);
        assert_eq!(quantize(99.0, 0.01), 99.0);
    }

    #[test]
    fn static_stop_fires_inside_bar_range_at_stop_price() {
        let mut st = StopState {
            stop_price: Some(99.0),
            ..StopState::default()
        };
        let exit = evaluate_bar(&mut st, 99.7, 98.9, t0(), 0.01).unwrap();
        assert_eq!(exit.reason, StopReason::StaticStopHit);
        assert_eq!(exit.price, 99.0);
    }

    #[test]
    fn static_stop_wins_over_trailing_on_same_bar() {
        let mut st = StopState {
            stop_price: Some(99.0),
            trail_percent: Some(5.0),
            highest_price: Some(110.0),
            activation_ts: Some(t0() - Duration::minutes(5)),
        };
        // Both stops are crossed (trail stop = 104.5); static is evaluated first.
        let exit = evaluate_bar(&mut st, 100.0, 95.0, t0(), 0.01).unwrap();
        assert_eq!(exit.reason, StopReason::StaticStopHit);
        assert_eq!(exit.price, 99.0);
    }

    #[test]
    fn trailing_is_inert_before_activation() {
        let mut st = StopState {
            trail_percent: Some(5.0),
            highest_price: Some(100.0),
            activation_ts: Some(t0() + Duration::minutes(5)),
            ..StopState::default()
        };
        // Same-bar plunge far below the would-be stop: no exit, no ratchet.
        assert!(evaluate_bar(&mut st, 100.0, 90.0, t0(), 0.01).is_none());
        assert_eq!(st.highest_price, Some(100.0));
    }

    #[test]
    fn trailing_ratchets_high_and_exits_on_cross() {
        let mut st = StopState {
            trail_percent: Some(5.0),
            highest_price: Some(100.0),
            activation_ts: Some(t0()),
            ..StopState::default()
        };

        // Rally to 110: no exit, high-water mark moves up.
        assert!(evaluate_bar(&mut st, 110.0, 105.0, t0() + Duration::minutes(6), 0.01).is_none());
        assert_eq!(st.highest_price, Some(110.0));

        // Bar trading wholly at 104.40, under the 104.50 stop: exit fills at
        // the bar's high (the stop level never traded).
        let exit =
            evaluate_bar(&mut st, 104.40, 104.40, t0() + Duration::minutes(7), 0.01).unwrap();
        assert_eq!(exit.reason, StopReason::TrailingStopHit);
        assert_eq!(exit.price, 104.40);
    }

    #[test]
    fn trailing_exit_at_stop_when_bar_straddles_it() {
        let mut st = StopState {
            trail_percent: Some(5.0),
            highest_price: Some(110.0),
            activation_ts: Some(t0()),
            ..StopState::default()
        };
        let exit = evaluate_bar(&mut st, 106.0, 104.0, t0() + Duration::minutes(1), 0.01).unwrap();
        assert_eq!(exit.reason, StopReason::TrailingStopHit);
        assert_eq!(exit.price, 104.5);
    }

    #[test]
    fn trail_stop_is_monotone_while_open() {
        let mut st = StopState {
            trail_percent: Some(8.0),
            highest_price: Some(50.0),
            activation_ts: Some(t0()),
            ..StopState::default()
        };
        let mut last_stop = 0.0;
        for (i, high) in [51.0, 55.0, 54.0, 55.0].iter().enumerate() {
            let at = t0() + Duration::minutes(5 + i as i64);
            let _ = evaluate_bar(&mut st, *high, high - 0.5, at, 0.01);
            let stop = st.highest_price.unwrap() * (1.0 - 8.0 / 100.0);
            assert!(stop >= last_stop, "trail stop moved down");
            last_stop = stop;
        }
        assert_eq!(st.highest_price, Some(55.0));
    }

    #[test]
    fn no_stops_armed_means_no_exit() {
        let mut st = StopState::default();
        assert!(evaluate_bar(&mut st, 100.0, 1.0, t0(), 0.01).is_none());
    }

    #[test]
    fn pnl_round_trip_includes_double_commission() {
        let (amount, percent) = trade_pnl(104.4, 100.0, 10.0, 1.0);
        assert!((amount - (4.4 * 10.0 - 2.0)).abs() < 1e-9);
        assert!((percent - (42.0 / 1000.0 * 100.0)).abs() < 1e-9);
    }
}
