//! Execution-record construction for the per-tick audit trail.

use chrono::{DateTime, Utc};
use sim_db::ExecRecord;
use sim_strategy::RunnerView;

/// Skeleton record for a runner at a tick; callers fill status/reason/details.
pub struct RecordCtx<'a> {
    pub runner: &'a RunnerView,
    pub user_id: i64,
    pub cycle_seq: i64,
    pub as_of: DateTime<Utc>,
}

impl RecordCtx<'_> {
    pub fn record(
        &self,
        status: &str,
        reason: Option<&str>,
        details: Option<String>,
    ) -> ExecRecord {
        ExecRecord {
            runner_id: self.runner.id,
            user_id: self.user_id,
            symbol: self.runner.stock.to_uppercase(),
            strategy: self.runner.strategy.clone(),
            status: status.to_string(),
            reason: reason.map(str::to_string),
            details,
            execution_time: self.as_of,
            cycle_seq: self.cycle_seq,
            timeframe: self.runner.time_frame as i32,
        }
    }

    pub fn completed(&self, reason: &str, details: Option<String>) -> ExecRecord {
        self.record("completed", Some(reason), details)
    }

    pub fn skipped(&self, status: &str, reason: &str, details: Option<String>) -> ExecRecord {
        self.record(status, Some(reason), details)
    }

    pub fn error(&self, reason: &str, details: Option<String>) -> ExecRecord {
        self.record("error", Some(reason), details)
    }
}

/// Round a price the way detail payloads persist it (6 decimals).
pub fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}
