//! Historical market-data gateway.
//!
//! Read-only access to the bar tables plus the helpers the engine leans on:
//! RTH filtering for intraday queries, a session-aware "next tick" that
//! respects holidays/DST by only returning timestamps that actually exist in
//! storage, and the indicator math strategies consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod indicators;
pub mod query;
pub mod session;

pub use query::MarketData;
pub use session::{et_day_of, is_regular_market_minute, is_stale_candle, ny_session_bounds};

/// Daily timeframe sentinel (minutes).
pub const DAILY_TF_MIN: u32 = 1440;

/// One OHLC aggregation for a symbol at a fixed interval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl Bar {
    pub fn new(ts: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: i64) -> Self {
        Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}
