//! Idempotency scenario against a live database: two batches carrying the
//! same conflict key but different statuses must end as a single row whose
//! status is the more severe one, and replaying a batch must not duplicate.
//!
//! Requires SIM_DATABASE_URL; skips quietly when it is not set so the suite
//! stays green on machines without Postgres.

use chrono::{TimeZone, Utc};
use sim_db::{bulk_upsert_runner_executions, ExecRecord};
use sqlx::Row;

fn record(cycle_seq: i64, status: &str, reason: &str) -> ExecRecord {
    ExecRecord {
        runner_id: 9_001,
        user_id: 9_001,
        symbol: "IDMP".to_string(),
        strategy: "below_above".to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        details: None,
        execution_time: Utc.with_ymd_and_hms(2021, 1, 4, 14, 30, 0).unwrap(),
        cycle_seq,
        timeframe: 5,
    }
}

#[tokio::test]
async fn severity_wins_and_replay_is_idempotent() {
    if std::env::var(sim_db::ENV_DB_URL).is_err() {
        eprintln!("skipping: {} not set", sim_db::ENV_DB_URL);
        return;
    }
    let pool = sim_db::testkit_db_pool().await.expect("db pool");

    // Unique cycle per test run avoids collisions with prior invocations.
    let cycle = 1_600_000_000 + (std::process::id() as i64);
    sqlx::query("delete from runner_executions where user_id = 9001 and cycle_seq = $1")
        .bind(cycle)
        .execute(&pool)
        .await
        .expect("cleanup");

    // First batch: a buy.
    bulk_upsert_runner_executions(&pool, vec![record(cycle, "completed", "buy")])
        .await
        .expect("first upsert");

    // Second batch carries the same key twice: buy then error. The collapse
    // keeps the error, and the upsert overwrites the stored buy.
    bulk_upsert_runner_executions(
        &pool,
        vec![
            record(cycle, "completed", "buy"),
            record(cycle, "error", "exception"),
        ],
    )
    .await
    .expect("second upsert");

    let rows = sqlx::query(
        "select status, reason from runner_executions where user_id = 9001 and cycle_seq = $1",
    )
    .bind(cycle)
    .fetch_all(&pool)
    .await
    .expect("fetch");

    assert_eq!(rows.len(), 1, "conflict key must collapse to one row");
    let status: String = rows[0].try_get("status").unwrap();
    assert_eq!(status, "error");

    // Replaying the identical batch changes nothing.
    bulk_upsert_runner_executions(
        &pool,
        vec![
            record(cycle, "completed", "buy"),
            record(cycle, "error", "exception"),
        ],
    )
    .await
    .expect("replay upsert");

    let (n,): (i64,) = sqlx::query_as(
        "select count(*)::bigint from runner_executions where user_id = 9001 and cycle_seq = $1",
    )
    .bind(cycle)
    .fetch_one(&pool)
    .await
    .expect("count");
    assert_eq!(n, 1);
}
