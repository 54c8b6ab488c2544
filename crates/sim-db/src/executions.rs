//! Idempotent per-tick execution records.
//!
//! Conflict key (matches the DB unique index): `(cycle_seq, user_id, symbol,
//! strategy, timeframe)`. A batch can legitimately carry two rows for the
//! same key — a broker stop-exit and a later advancement in the same tick —
//! so duplicates are collapsed before the single `ON CONFLICT DO UPDATE`
//! statement, which would otherwise raise "row updated twice". Winner
//! selection keeps the most informative record.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, QueryBuilder};
use std::collections::HashMap;
use tracing::{debug, warn};

/// One runner-execution row as buffered by the engine during a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecRecord {
    pub runner_id: i64,
    pub user_id: i64,
    pub symbol: String,
    pub strategy: String,
    pub status: String,
    pub reason: Option<String>,
    pub details: Option<String>,
    pub execution_time: DateTime<Utc>,
    pub cycle_seq: i64,
    pub timeframe: i32,
}

impl ExecRecord {
    /// Normalize for a stable unique key: uppercase symbol, non-empty
    /// strategy, timeframe backfilled to 5 when callers left it unset.
    fn normalized(mut self) -> Self {
        self.symbol = if self.symbol.trim().is_empty() {
            "UNKNOWN".to_string()
        } else {
            self.symbol.to_uppercase()
        };
        if self.strategy.trim().is_empty() {
            self.strategy = "unknown".to_string();
        }
        if self.timeframe <= 0 {
            self.timeframe = 5;
        }
        self
    }

    fn key(&self) -> (i64, i64, String, String, i32) {
        (
            self.cycle_seq,
            self.user_id,
            self.symbol.clone(),
            self.strategy.clone(),
            self.timeframe,
        )
    }
}

/// Row importance for duplicate collapse. Higher wins.
pub fn severity(status: &str, reason: Option<&str>) -> u8 {
    let status = status.to_lowercase();
    let reason = reason.unwrap_or("").to_lowercase();
    if status == "error" {
        return 50;
    }
    if reason == "sell" {
        return 40;
    }
    if reason == "buy" {
        return 30;
    }
    if status == "completed" {
        return 20;
    }
    if status.starts_with("skipped") {
        return 10;
    }
    0
}

fn better(a: ExecRecord, b: ExecRecord) -> ExecRecord {
    let sa = severity(&a.status, a.reason.as_deref());
    let sb = severity(&b.status, b.reason.as_deref());
    if sb > sa {
        return b;
    }
    if sa > sb {
        return a;
    }
    // Tie-break 1: prefer the row carrying details.
    let da = a.details.as_deref().unwrap_or("");
    let db = b.details.as_deref().unwrap_or("");
    if !db.is_empty() && da.is_empty() {
        return b;
    }
    if !da.is_empty() && db.is_empty() {
        return a;
    }
    // Tie-break 2: latest execution_time; final: last-write-wins.
    if b.execution_time >= a.execution_time {
        b
    } else {
        a
    }
}

/// Collapse same-key duplicates within a batch, preserving first-seen key
/// order. Returns `(deduped, collapsed_count)`.
pub fn collapse_batch(records: Vec<ExecRecord>) -> (Vec<ExecRecord>, usize) {
    let before = records.len();
    let mut order: Vec<(i64, i64, String, String, i32)> = Vec::new();
    let mut merged: HashMap<(i64, i64, String, String, i32), ExecRecord> = HashMap::new();

    for rec in records {
        let rec = rec.normalized();
        let key = rec.key();
        match merged.remove(&key) {
            Some(existing) => {
                merged.insert(key, better(existing, rec));
            }
            None => {
                order.push(key.clone());
                merged.insert(key, rec);
            }
        }
    }

    let out: Vec<ExecRecord> = order
        .into_iter()
        .map(|k| merged.remove(&k).expect("key present"))
        .collect();
    let collapsed = before - out.len();
    (out, collapsed)
}

/// Insert-or-update the batch in a single statement inside one transaction.
/// Replaying a tick with identical inputs is a no-op beyond refreshed
/// payload columns.
pub async fn bulk_upsert_runner_executions(pool: &PgPool, records: Vec<ExecRecord>) -> Result<u64> {
    if records.is_empty() {
        debug!("bulk_upsert_runner_executions: nothing to upsert (0 rows)");
        return Ok(0);
    }

    let (deduped, collapsed) = collapse_batch(records);
    if collapsed > 0 {
        warn!(
            collapsed,
            rows = deduped.len(),
            "bulk_upsert_runner_executions: collapsed duplicate conflict keys"
        );
    }

    let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
        "insert into runner_executions \
         (runner_id, user_id, symbol, strategy, status, reason, details, execution_time, cycle_seq, timeframe) ",
    );
    qb.push_values(&deduped, |mut b, rec| {
        b.push_bind(rec.runner_id)
            .push_bind(rec.user_id)
            .push_bind(&rec.symbol)
            .push_bind(&rec.strategy)
            .push_bind(&rec.status)
            .push_bind(&rec.reason)
            .push_bind(&rec.details)
            .push_bind(rec.execution_time)
            .push_bind(rec.cycle_seq)
            .push_bind(rec.timeframe);
    });
    qb.push(
        " on conflict (cycle_seq, user_id, symbol, strategy, timeframe) do update \
          set runner_id      = excluded.runner_id, \
              status         = excluded.status, \
              reason         = excluded.reason, \
              details        = excluded.details, \
              execution_time = excluded.execution_time",
    );

    let mut tx = pool
        .begin()
        .await
        .context("bulk_upsert_runner_executions begin failed")?;
    let res = qb
        .build()
        .execute(&mut *tx)
        .await
        .context("bulk_upsert_runner_executions statement failed")?;
    tx.commit()
        .await
        .context("bulk_upsert_runner_executions commit failed")?;

    Ok(res.rows_affected())
}

/// Total persisted execution rows for a user.
pub async fn execution_count(pool: &PgPool, user_id: i64) -> Result<i64> {
    let (n,): (i64,) =
        sqlx::query_as("select count(*)::bigint from runner_executions where user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .context("execution_count failed")?;
    Ok(n)
}

/// Latest recorded `(status, reason)` for a user, if any.
pub async fn latest_execution_status(
    pool: &PgPool,
    user_id: i64,
) -> Result<Option<(String, Option<String>)>> {
    let row: Option<(Option<String>, Option<String>)> = sqlx::query_as(
        r#"
        select status, reason
        from runner_executions
        where user_id = $1
        order by cycle_seq desc, id desc
        limit 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("latest_execution_status failed")?;
    Ok(row.map(|(status, reason)| (status.unwrap_or_default(), reason)))
}

// ---------------------------------------------------------------------------
// Tests (pure collapse logic; the statement itself is covered by scenario
// tests against a live database)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rec(status: &str, reason: Option<&str>, details: Option<&str>) -> ExecRecord {
        ExecRecord {
            runner_id: 1,
            user_id: 1,
            symbol: "AAPL".to_string(),
            strategy: "below_above".to_string(),
            status: status.to_string(),
            reason: reason.map(str::to_string),
            details: details.map(str::to_string),
            execution_time: Utc.with_ymd_and_hms(2021, 1, 4, 14, 30, 0).unwrap(),
            cycle_seq: 1_609_770_600,
            timeframe: 5,
        }
    }

    #[test]
    fn severity_ordering_matches_contract() {
        assert!(severity("error", None) > severity("completed", Some("sell")));
        assert!(severity("completed", Some("sell")) > severity("completed", Some("buy")));
        assert!(severity("completed", Some("buy")) > severity("completed", Some("no_action")));
        assert!(severity("completed", None) > severity("skipped-no-data", None));
        assert!(severity("skipped-stale-price", None) > severity("other", None));
    }

    #[test]
    fn error_beats_buy_on_same_key() {
        let (out, collapsed) = collapse_batch(vec![
            rec("completed", Some("buy"), Some("{}")),
            rec("error", Some("exception"), None),
        ]);
        assert_eq!(collapsed, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].status, "error");
    }

    #[test]
    fn tie_prefers_row_with_details() {
        let (out, _) = collapse_batch(vec![
            rec("completed", Some("no_action"), None),
            rec("completed", Some("no_action"), Some("{\"price\": 1.0}")),
        ]);
        assert_eq!(out.len(), 1);
        assert!(out[0].details.is_some());
    }

    #[test]
    fn tie_with_details_prefers_latest_execution_time() {
        let mut older = rec("completed", Some("no_action"), Some("a"));
        older.execution_time = Utc.with_ymd_and_hms(2021, 1, 4, 14, 0, 0).unwrap();
        let newer = rec("completed", Some("no_action"), Some("b"));
        let (out, _) = collapse_batch(vec![newer.clone(), older]);
        assert_eq!(out[0].details.as_deref(), Some("b"));
    }

    #[test]
    fn distinct_keys_are_untouched_in_order() {
        let mut other_symbol = rec("completed", Some("buy"), None);
        other_symbol.symbol = "MSFT".to_string();
        let (out, collapsed) = collapse_batch(vec![
            rec("completed", Some("buy"), None),
            other_symbol,
        ]);
        assert_eq!(collapsed, 0);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].symbol, "AAPL");
        assert_eq!(out[1].symbol, "MSFT");
    }

    #[test]
    fn normalization_backfills_key_columns() {
        let mut r = rec("completed", None, None);
        r.symbol = " ".to_string();
        r.strategy = "".to_string();
        r.timeframe = 0;
        let (out, _) = collapse_batch(vec![r]);
        assert_eq!(out[0].symbol, "UNKNOWN");
        assert_eq!(out[0].strategy, "unknown");
        assert_eq!(out[0].timeframe, 5);
    }

    #[test]
    fn broker_exit_then_advancement_keeps_the_sell() {
        // The legitimate same-tick duplicate: stop exit (sell) then a later
        // no_action row for the same pair.
        let (out, collapsed) = collapse_batch(vec![
            rec("completed", Some("sell"), Some("{\"message\":\"broker_stop_triggered\"}")),
            rec("completed", Some("no_action"), None),
        ]);
        assert_eq!(collapsed, 1);
        assert_eq!(out[0].reason.as_deref(), Some("sell"));
    }
}
