//! Smoke-test strategy: one-bar momentum, market orders, no stops.
//!
//! Deterministic on purpose so replays stay reproducible; the heavy lifting
//! in tests is the engine plumbing around it, not the signal.

use serde_json::{json, Value};

use crate::{DecisionCtx, Strategy};

pub struct BasicStrategy;

impl Strategy for BasicStrategy {
    fn name(&self) -> &'static str {
        "BasicStrategy"
    }

    fn decide_buy(&self, ctx: &DecisionCtx) -> Value {
        let n = ctx.candles.len();
        if n < 2 {
            return json!({"action": "NO_ACTION", "reason": "insufficient_data"});
        }
        if ctx.candles[n - 1].close > ctx.candles[n - 2].close {
            json!({
                "action": "BUY",
                "quantity": 1,
                "order_type": "MKT",
                "reason": "up_bar",
            })
        } else {
            json!({"action": "NO_ACTION", "reason": "down_bar"})
        }
    }

    fn decide_sell(&self, ctx: &DecisionCtx) -> Value {
        let n = ctx.candles.len();
        if n < 2 {
            return json!({"action": "NO_ACTION", "reason": "insufficient_data"});
        }
        if ctx.candles[n - 1].close < ctx.candles[n - 2].close {
            let qty = ctx.position.map(|p| p.quantity as i64).unwrap_or(0);
            json!({
                "action": "SELL",
                "quantity": qty,
                "order_type": "MKT",
                "reason": "down_bar",
            })
        } else {
            json!({"action": "NO_ACTION", "reason": "hold_up_bar"})
        }
    }
}
