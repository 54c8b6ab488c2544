//! Decision context types.
//!
//! Strategies see immutable snapshots only: a [`RunnerView`] of the runner
//! row, an optional [`PositionView`] of the broker-owned position, the
//! current price, and the candle window. No DB handles, no broker handles.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sim_md::Bar;

/// Immutable snapshot of a runner row, taken once per tick.
#[derive(Clone, Debug)]
pub struct RunnerView {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub strategy: String,
    pub stock: String,
    pub time_frame: u32,
    pub parameters: Value,
    pub budget: f64,
    pub current_budget: f64,
    pub exit_strategy: String,
    pub activation: String,
    pub time_range_from: Option<DateTime<Utc>>,
    pub time_range_to: Option<DateTime<Utc>>,
}

impl RunnerView {
    /// Numeric parameter lookup with a default; tolerates strings holding
    /// numbers (legacy parameter payloads were loosely typed).
    pub fn param_f64(&self, key: &str, default: f64) -> f64 {
        match self.parameters.get(key) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn param_opt_f64(&self, key: &str) -> Option<f64> {
        match self.parameters.get(key) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Snapshot of the broker-owned open position (read-only to strategies).
#[derive(Clone, Debug)]
pub struct PositionView {
    pub runner_id: i64,
    pub symbol: String,
    pub quantity: f64,
    pub avg_price: f64,
    pub created_at: DateTime<Utc>,
    pub stop_price: Option<f64>,
    pub trail_percent: Option<f64>,
    pub highest_price: Option<f64>,
    pub activation_ts: Option<DateTime<Utc>>,
}

/// Everything a strategy may look at for one decision.
#[derive(Clone, Debug)]
pub struct DecisionCtx<'a> {
    pub runner: &'a RunnerView,
    pub position: Option<&'a PositionView>,
    pub current_price: f64,
    pub candles: &'a [Bar],
    /// Seconds until the runner's time window closes; `<= 0` means expired.
    pub distance_from_time_limit: Option<i64>,
}

/// A registered trading strategy. Decisions come back as generic JSON maps
/// and are validated by `parse_decision` before anything executes.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn decide_buy(&self, ctx: &DecisionCtx) -> Value;

    fn decide_sell(&self, ctx: &DecisionCtx) -> Value;
}
