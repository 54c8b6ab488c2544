//! Buy ABOVE / sell BELOW trigger strategy with an ATR-sized trailing stop.
//!
//! Every decision, including NO_ACTION, carries enough detail for the UI to
//! answer "why did it skip" without guesswork.

use serde_json::{json, Value};
use sim_md::indicators;

use crate::explain::format_actual_vs_wanted;
use crate::{DecisionCtx, Strategy};

/// Trigger buffers: +0.15% above the buy trigger, -0.15% below the sell one.
const ABOVE_BUFFER: f64 = 0.0015;
const BELOW_BUFFER: f64 = 0.0015;

/// How tight the limit sits vs. the last price (0.05%).
const LIMIT_WIGGLE: f64 = 0.0005;

const ATR_PERIOD: usize = 14;

pub struct BelowAboveStrategy;

impl Strategy for BelowAboveStrategy {
    fn name(&self) -> &'static str {
        "BelowAboveStrategy"
    }

    fn decide_buy(&self, ctx: &DecisionCtx) -> Value {
        let price = ctx.current_price;

        let Some(above_buy) = ctx.runner.param_opt_f64("above_buy") else {
            return json!({
                "action": "NO_ACTION",
                "reason": "missing_params",
                "explanation": "'above_buy' parameter missing",
            });
        };

        let trigger_price = above_buy * (1.0 + ABOVE_BUFFER);
        if price < trigger_price {
            let core = format_actual_vs_wanted("price", price, "breakout trigger", trigger_price);
            return json!({
                "action": "NO_ACTION",
                "reason": "price_below_trigger",
                "price": price,
                "trigger_price": round4(trigger_price),
                "above_buy": above_buy,
                "explanation": format!("NO BUY SIGNAL - {core}"),
            });
        }

        // Limit price first; quantity sized against it so a fill can never
        // exceed the runner budget.
        let limit_price = round2(price * (1.0 + LIMIT_WIGGLE));
        let budget = ctx.runner.current_budget;
        let mut qty = (budget / limit_price).floor() as i64;
        while qty > 0 && qty as f64 * limit_price > budget {
            qty -= 1;
        }
        if qty <= 0 {
            return json!({
                "action": "NO_ACTION",
                "reason": "funds<1share",
                "price": price,
                "limit_price": limit_price,
                "budget": budget,
                "explanation": format!(
                    "NO BUY SIGNAL - budget ${budget:.2} cannot cover one share at ${limit_price:.2}"
                ),
            });
        }

        let atr = indicators::atr(ctx.candles, ATR_PERIOD);
        if atr.is_nan() {
            return json!({
                "action": "NO_ACTION",
                "reason": "atr_unavailable",
                "price": price,
                "explanation": "NO BUY SIGNAL - ATR unavailable, cannot size the trailing stop",
            });
        }
        let atr_percent = round2(atr / price * 100.0);

        json!({
            "action": "BUY",
            "quantity": qty,
            "order_type": "LMT",
            "limit_price": limit_price,
            "reason": "price_above_trigger",
            "price": price,
            "trigger_price": round4(trigger_price),
            "trail_stop_order": {
                "action": "SELL",
                "order_type": "TRAIL_LIMIT",
                "trailing_percent": atr_percent,
            },
            "explanation": format!(
                "Break-out: price {price:.2} >= trigger {trigger_price:.2}; buy {qty} @<= {limit_price:.2} with ATR {atr_percent:.2}% trail"
            ),
        })
    }

    fn decide_sell(&self, ctx: &DecisionCtx) -> Value {
        let price = ctx.current_price;
        let qty = ctx.position.map(|p| p.quantity as i64).unwrap_or(0);

        // Runner expiry wins over everything else.
        if matches!(ctx.distance_from_time_limit, Some(d) if d <= 0) {
            return json!({
                "action": "SELL",
                "quantity": qty,
                "order_type": "LMT",
                "limit_price": round2(price * (1.0 - LIMIT_WIGGLE)),
                "reason": "time_exit",
                "price": price,
                "explanation": "Runner expiry window reached - flattening position",
            });
        }

        // Support both historical parameter names.
        let stop_trigger = ctx
            .runner
            .param_opt_f64("sell_trigger")
            .or_else(|| ctx.runner.param_opt_f64("below_sell"));
        let Some(stop_trigger) = stop_trigger else {
            return json!({
                "action": "NO_ACTION",
                "reason": "missing_params",
                "price": price,
                "explanation": "sell_trigger/below_sell parameter missing",
            });
        };

        let below_trigger = stop_trigger * (1.0 - BELOW_BUFFER);
        if price <= below_trigger {
            return json!({
                "action": "SELL",
                "quantity": qty,
                "order_type": "LMT",
                "limit_price": round2(price * (1.0 - LIMIT_WIGGLE)),
                "reason": "stop_loss_triggered",
                "price": price,
                "stop_trigger": stop_trigger,
                "below_trigger": below_trigger,
                "explanation": format!("Price {price:.2} <= sell-trigger {below_trigger:.2}"),
            });
        }

        let take_profit_pct = ctx.runner.param_f64("take_profit", 0.0);
        if take_profit_pct > 0.0 {
            if let Some(pos) = ctx.position {
                let tp_level = pos.avg_price * (1.0 + take_profit_pct / 100.0);
                if price >= tp_level {
                    return json!({
                        "action": "SELL",
                        "quantity": qty,
                        "order_type": "LMT",
                        "limit_price": round2(price * (1.0 - LIMIT_WIGGLE)),
                        "reason": "take_profit_triggered",
                        "price": price,
                        "tp_level": tp_level,
                        "explanation": format!("Price {price:.2} >= take-profit {tp_level:.2}"),
                    });
                }
            }
        }

        let core = format_actual_vs_wanted("price", price, "sell trigger", below_trigger);
        json!({
            "action": "NO_ACTION",
            "reason": "price_above_threshold",
            "price": price,
            "stop_trigger": stop_trigger,
            "below_trigger": below_trigger,
            "explanation": format!("NO SELL SIGNAL - {core}"),
        })
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{parse_decision, Decision, ValidationEnv};
    use crate::types::RunnerView;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use sim_md::Bar;

    fn runner(params: Value) -> RunnerView {
        RunnerView {
            id: 1,
            user_id: 1,
            name: "AAPL-below_above-5m".to_string(),
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

    fn candles(n: usize, close: f64) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2021, 1, 4, 14, 30, 0).unwrap();
        (0..n)
            .map(|i| {
                Bar::new(
                    t0 + Duration::minutes(5 * i as i64),
                    close,
                    close + 0.5,
                    close - 0.5,
                    close,
                    10_000,
                )
            })
            .collect()
    }

    #[test]
    fn buy_fires_above_trigger_and_validates() {
        let r = runner(json!({"above_buy": 100.0}));
        let bars = candles(30, 102.0);
        let ctx = DecisionCtx {
            runner: &r,
            position: None,
            current_price: 102.0,
            candles: &bars,
            distance_from_time_limit: None,
        };
        let raw = BelowAboveStrategy.decide_buy(&ctx);
        let parsed = parse_decision(&raw, false, ValidationEnv::Analytics).unwrap();
        match parsed {
            Decision::Buy(b) => {
                assert!(b.quantity.unwrap() > 0);
                assert!(b.trail_stop.is_some());
                assert!(b.limit_price.unwrap() > 102.0);
            }
            other => panic!("expected Buy, got {other:?}"),
        }
    }

    #[test]
    fn no_buy_below_trigger() {
        let r = runner(json!({"above_buy": 100.0}));
        let bars = candles(30, 99.0);
        let ctx = DecisionCtx {
            runner: &r,
            position: None,
            current_price: 99.0,
            candles: &bars,
            distance_from_time_limit: None,
        };
        let raw = BelowAboveStrategy.decide_buy(&ctx);
        assert_eq!(raw["action"], "NO_ACTION");
        assert_eq!(raw["reason"], "price_below_trigger");
    }

    #[test]
    fn missing_params_is_explained() {
        let r = runner(json!({}));
        let bars = candles(30, 99.0);
        let ctx = DecisionCtx {
            runner: &r,
            position: None,
            current_price: 99.0,
            candles: &bars,
            distance_from_time_limit: None,
        };
        let raw = BelowAboveStrategy.decide_buy(&ctx);
        assert_eq!(raw["reason"], "missing_params");
    }
}
