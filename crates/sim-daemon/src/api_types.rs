//! JSON payloads for the control/reporting surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    pub instance_id: uuid::Uuid,
}

/// Point-in-time snapshot of simulation state and counters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimStatusResponse {
    pub is_running: bool,
    pub last_ts: Option<DateTime<Utc>>,
    pub executions: i64,
    pub trades: i64,
    pub open_positions: i64,
    /// Latest persisted execution `(status, reason)`, when any exists.
    pub latest_status: Option<String>,
    pub latest_reason: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct StartRequest {
    /// Optional cursor seed (epoch seconds); otherwise the loop resumes from
    /// the persisted `last_ts` or the earliest stored bar.
    pub start_epoch: Option<i64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResultRow {
    pub symbol: String,
    pub strategy: String,
    pub timeframe: String,
    pub start_ts: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
    pub final_pnl_amount: Option<f64>,
    pub final_pnl_percent: Option<f64>,
    pub trades_count: Option<i32>,
    pub max_drawdown: Option<f64>,
    pub avg_pnl_per_trade: Option<f64>,
    pub avg_trade_duration_sec: Option<f64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResultsResponse {
    pub results: Vec<ResultRow>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
