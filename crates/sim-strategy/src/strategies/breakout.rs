//! Long-only trend breakout:
//!   - Donchian breakout trigger with a long-MA trend filter
//!   - RSI momentum window
//!   - ATR-sized trailing stop attached on BUY, clamped to a sane band

use serde_json::{json, Value};
use sim_md::indicators;

use crate::explain::{checks_json, format_checklist, Check};
use crate::{DecisionCtx, Strategy};

const BREAKOUT_LOOKBACK: usize = 20;
const LONG_MA_PERIOD: usize = 20;
const ATR_PERIOD: usize = 14;
const RSI_PERIOD: usize = 14;
const RSI_MIN: f64 = 50.0;
const RSI_MAX: f64 = 80.0;

/// Expressed in percent (0.10 -> 0.10%).
const BUY_BUFFER_PCT: f64 = 0.10;

const TRAIL_MIN_PCT: f64 = 0.75;
const TRAIL_MAX_PCT: f64 = 8.0;

const LIMIT_WIGGLE: f64 = 0.0005;

/// Exit when trend breaks: close under the long MA with RSI rolled over.
const EXIT_RSI: f64 = 45.0;

pub struct DonchianBreakoutStrategy;

impl Strategy for DonchianBreakoutStrategy {
    fn name(&self) -> &'static str {
        "DonchianBreakoutStrategy"
    }

    fn decide_buy(&self, ctx: &DecisionCtx) -> Value {
        let price = ctx.current_price;
        let candles = ctx.candles;

        let min_bars = (BREAKOUT_LOOKBACK + 1)
            .max(LONG_MA_PERIOD + 1)
            .max(ATR_PERIOD + 1)
            .max(RSI_PERIOD + 1);
        if candles.len() < min_bars {
            return json!({
                "action": "NO_ACTION",
                "reason": "insufficient_data",
                "price": round4(price),
                "candles_count": candles.len(),
                "required_bars": min_bars,
                "explanation": format!("Need >= {min_bars} bars"),
            });
        }

        let donchian = indicators::donchian_channel(candles, BREAKOUT_LOOKBACK);
        let long_ma = indicators::sma(candles, LONG_MA_PERIOD);
        let atr = indicators::atr(candles, ATR_PERIOD);
        let rsi = indicators::rsi(candles, RSI_PERIOD);

        let Some((upper, _lower)) = donchian else {
            return indicator_unavailable(price);
        };
        if long_ma.is_nan() || atr.is_nan() || rsi.is_nan() {
            return indicator_unavailable(price);
        }

        let breakout_level = upper * (1.0 + BUY_BUFFER_PCT / 100.0);
        let trend_ok = price > long_ma;
        let breakout_ok = price >= breakout_level;
        let momentum_ok = (RSI_MIN..=RSI_MAX).contains(&rsi);

        let checks = [
            Check::value("Trend (price > MA long)", trend_ok, price, long_ma),
            Check::value("Breakout (price >= Donchian+buf)", breakout_ok, price, breakout_level),
            Check::range("Momentum (RSI range)", momentum_ok, rsi, RSI_MIN, RSI_MAX),
        ];

        if !(trend_ok && breakout_ok && momentum_ok) {
            return json!({
                "action": "NO_ACTION",
                "reason": "conditions_not_met",
                "price": round4(price),
                "explanation": format_checklist(&checks),
                "checks": checks_json(&checks),
            });
        }

        let trail_pct = (atr / price * 100.0).clamp(TRAIL_MIN_PCT, TRAIL_MAX_PCT);
        let limit_price = round2(price * (1.0 + LIMIT_WIGGLE));

        json!({
            "action": "BUY",
            "order_type": "LMT",
            "limit_price": limit_price,
            "reason": "breakout_confirmed",
            "price": round4(price),
            "breakout_level": round4(breakout_level),
            "trail_stop_order": {
                "action": "SELL",
                "order_type": "TRAIL_LIMIT",
                "trailing_percent": round2(trail_pct),
            },
            "checks": checks_json(&checks),
            "explanation": format!(
                "Breakout above {breakout_level:.2} with trend and momentum confirmed; {trail_pct:.2}% trail"
            ),
        })
    }

    fn decide_sell(&self, ctx: &DecisionCtx) -> Value {
        let price = ctx.current_price;
        let candles = ctx.candles;

        let long_ma = indicators::sma(candles, LONG_MA_PERIOD);
        let rsi = indicators::rsi(candles, RSI_PERIOD);
        if long_ma.is_nan() || rsi.is_nan() {
            // Position protection stays with the broker-side trailing stop.
            return json!({
                "action": "NO_ACTION",
                "reason": "indicator_unavailable",
                "price": round4(price),
                "explanation": "Missing/NaN indicators; relying on broker stop",
            });
        }

        let trend_break = price < long_ma;
        let momentum_break = rsi < EXIT_RSI;
        if trend_break && momentum_break {
            let qty = ctx.position.map(|p| p.quantity as i64).unwrap_or(0);
            return json!({
                "action": "SELL",
                "quantity": qty,
                "order_type": "MKT",
                "reason": "trend_break",
                "price": round4(price),
                "explanation": format!(
                    "Trend break: price {price:.2} < MA {long_ma:.2} with RSI {rsi:.1} < {EXIT_RSI}"
                ),
            });
        }

        json!({
            "action": "NO_ACTION",
            "reason": "trend_intact",
            "price": round4(price),
            "explanation": "Trend intact; holding with broker-managed trail",
        })
    }
}

fn indicator_unavailable(price: f64) -> Value {
    json!({
        "action": "NO_ACTION",
        "reason": "indicator_unavailable",
        "price": round4(price),
        "explanation": "Missing/NaN indicators",
    })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}
