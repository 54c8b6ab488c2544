//! Long-only strategy combining a Fibonacci retracement entry level with
//! trend, momentum and volume confirmation, plus an adaptive ATR trail.
//! Deliberately loose thresholds so good stocks trigger often.

use serde_json::{json, Value};
use sim_md::indicators;

use crate::explain::{checks_json, format_checklist, Check};
use crate::{DecisionCtx, Strategy};

const MA_SHORT_PERIOD: usize = 20;
const MA_LONG_PERIOD: usize = 20;
const RSI_PERIOD: usize = 14;
const RSI_LOW: f64 = 40.0;
const RSI_HIGH: f64 = 75.0;
const ATR_PERIOD: usize = 14;
const VOLUME_MA_PERIOD: usize = 20;

/// Entry sits this far above the 61.8% retracement of the recent swing.
const FIB_OFFSET_RATIO: f64 = 0.10;
const FIB_SWING_BARS: usize = 50;

const TRAIL_MIN_PCT: f64 = 0.5;
const TRAIL_MAX_PCT: f64 = 6.0;

const LIMIT_WIGGLE: f64 = 0.0005;

pub struct FibMomentumStrategy;

impl Strategy for FibMomentumStrategy {
    fn name(&self) -> &'static str {
        "FibMomentumStrategy"
    }

    fn decide_buy(&self, ctx: &DecisionCtx) -> Value {
        let price = ctx.current_price;
        let candles = ctx.candles;

        let min_bars = (MA_LONG_PERIOD + 1)
            .max(RSI_PERIOD + 1)
            .max(ATR_PERIOD + 1)
            .max(VOLUME_MA_PERIOD + 1);
        if candles.len() < min_bars {
            return json!({
                "action": "NO_ACTION",
                "reason": "insufficient_data",
                "explanation": format!("Need at least {min_bars} bars"),
                "checks": checks_json(&[Check::value(
                    "Minimum bars",
                    false,
                    candles.len() as f64,
                    min_bars as f64,
                )]),
            });
        }

        let ma_short = indicators::ema(candles, MA_SHORT_PERIOD);
        let ma_long = indicators::sma(candles, MA_LONG_PERIOD);
        let rsi = indicators::rsi(candles, RSI_PERIOD);
        let atr = indicators::atr(candles, ATR_PERIOD);
        let volume_ma = indicators::average_volume(candles, VOLUME_MA_PERIOD);
        if ma_short.is_nan() || ma_long.is_nan() || rsi.is_nan() || atr.is_nan() {
            return json!({
                "action": "NO_ACTION",
                "reason": "indicator_unavailable",
                "explanation": "Missing/NaN indicators",
            });
        }

        // 61.8% retracement of the recent swing, pushed up by the offset.
        let swing = &candles[candles.len().saturating_sub(FIB_SWING_BARS)..];
        let swing_high = swing.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let swing_low = swing.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let fib_618 = swing_high - (swing_high - swing_low) * 0.618;
        let entry_level = fib_618 * (1.0 + FIB_OFFSET_RATIO);

        let last_volume = candles.last().map(|c| c.volume as f64).unwrap_or(0.0);
        let trend_ok = price > ma_long && ma_short > ma_long;
        let momentum_ok = rsi > RSI_LOW && rsi < RSI_HIGH;
        let volume_ok = last_volume > volume_ma * 1.2;
        let fib_ok = price > entry_level;

        let checks = [
            Check::value("Trend (price > MA long)", trend_ok, price, ma_long),
            Check::range("Momentum (RSI in range)", momentum_ok, rsi, RSI_LOW, RSI_HIGH),
            Check::value("Volume breakout", volume_ok, last_volume, volume_ma * 1.2),
            Check::value("Fib entry", fib_ok, price, entry_level),
        ];

        if !(trend_ok && momentum_ok && volume_ok && fib_ok) {
            return json!({
                "action": "NO_ACTION",
                "reason": "conditions_not_met",
                "explanation": format_checklist(&checks),
                "checks": checks_json(&checks),
            });
        }

        let trail_pct = (atr / price * 100.0).clamp(TRAIL_MIN_PCT, TRAIL_MAX_PCT);
        json!({
            "action": "BUY",
            "order_type": "LMT",
            "price": round4(price),
            "limit_price": round4(price * (1.0 + LIMIT_WIGGLE)),
            "trail_stop_order": {
                "action": "SELL",
                "order_type": "TRAIL_LIMIT",
                "trailing_percent": round2(trail_pct),
            },
            "explanation": format_checklist(&checks),
            "checks": checks_json(&checks),
        })
    }

    fn decide_sell(&self, ctx: &DecisionCtx) -> Value {
        let price = ctx.current_price;
        let candles = ctx.candles;

        if candles.len() < ATR_PERIOD + 1 {
            return json!({
                "action": "NO_ACTION",
                "reason": "insufficient_data",
                "explanation": format!("Need at least {} bars for ATR", ATR_PERIOD + 1),
            });
        }
        let atr = indicators::atr(candles, ATR_PERIOD);
        if atr.is_nan() {
            return json!({
                "action": "NO_ACTION",
                "reason": "indicator_unavailable",
                "explanation": "ATR indicator unavailable",
            });
        }

        // Exits are the broker-managed trail's job; the strategy only
        // flattens when the trail was never armed (no trail on the position).
        let trail_armed = ctx
            .position
            .and_then(|p| p.trail_percent)
            .is_some_and(|t| t > 0.0);
        if trail_armed {
            return json!({
                "action": "NO_ACTION",
                "reason": "broker_trail_active",
                "explanation": "Holding; broker-managed trailing stop protects the position",
            });
        }

        let trail_pct = (atr / price * 100.0).clamp(TRAIL_MIN_PCT, TRAIL_MAX_PCT);
        let qty = ctx.position.map(|p| p.quantity as i64).unwrap_or(0);
        json!({
            "action": "SELL",
            "quantity": qty,
            "order_type": "LMT",
            "price": round4(price),
            "limit_price": round4(price * (1.0 - LIMIT_WIGGLE)),
            "reason": "unprotected_position",
            "explanation": format!(
                "SELL SIGNAL - no trail armed; flattening rather than holding naked (ATR trail would be {trail_pct:.2}%)"
            ),
        })
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}
