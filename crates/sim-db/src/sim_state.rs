use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::info;

#[derive(Debug, Clone)]
pub struct SimulationStateRow {
    pub user_id: i64,
    pub is_running: String,
    pub last_ts: Option<DateTime<Utc>>,
}

pub async fn load_sim_state(pool: &PgPool, user_id: i64) -> Result<Option<SimulationStateRow>> {
    let row = sqlx::query(
        "select user_id, is_running, last_ts from simulation_state where user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("load_sim_state failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(SimulationStateRow {
        user_id: row.try_get("user_id")?,
        is_running: row.try_get("is_running")?,
        last_ts: row.try_get("last_ts")?,
    }))
}

/// Ensure the singleton state row exists; leaves existing values untouched.
pub async fn ensure_sim_state(pool: &PgPool, user_id: i64) -> Result<SimulationStateRow> {
    sqlx::query(
        r#"
        insert into simulation_state (user_id, is_running)
        values ($1, 'false')
        on conflict (user_id) do nothing
        "#,
    )
    .bind(user_id)
    .execute(pool)
    .await
    .context("ensure_sim_state insert failed")?;

    load_sim_state(pool, user_id)
        .await?
        .context("simulation_state row missing after ensure")
}

pub async fn set_is_running(pool: &PgPool, user_id: i64, running: bool) -> Result<()> {
    sqlx::query(
        r#"
        insert into simulation_state (user_id, is_running)
        values ($1, $2)
        on conflict (user_id) do update set is_running = excluded.is_running
        "#,
    )
    .bind(user_id)
    .bind(if running { "true" } else { "false" })
    .execute(pool)
    .await
    .context("set_is_running failed")?;
    Ok(())
}

pub async fn set_last_ts(
    pool: &PgPool,
    user_id: i64,
    last_ts: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into simulation_state (user_id, is_running, last_ts)
        values ($1, 'false', $2)
        on conflict (user_id) do update set last_ts = excluded.last_ts
        "#,
    )
    .bind(user_id)
    .bind(last_ts)
    .execute(pool)
    .await
    .context("set_last_ts failed")?;
    Ok(())
}

/// Reset the simulation scope: clear the cursor, truncate every
/// simulation-produced table, and reseed the mock account.
pub async fn reset_sim_scope(pool: &PgPool, user_id: i64, starting_cash: f64) -> Result<()> {
    let mut tx = pool.begin().await.context("reset_sim_scope begin failed")?;

    sqlx::query("update simulation_state set last_ts = null, is_running = 'false' where user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("reset cursor failed")?;

    for table in [
        "runner_executions",
        "orders",
        "executed_trades",
        "open_positions",
        "analytics_results",
    ] {
        sqlx::query(&format!("truncate table {table}"))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("truncate {table} failed"))?;
    }

    sqlx::query(
        r#"
        update accounts
        set cash = $2, equity = $2
        where user_id = $1 and name = 'mock'
        "#,
    )
    .bind(user_id)
    .bind(starting_cash)
    .execute(&mut *tx)
    .await
    .context("reset account failed")?;

    tx.commit().await.context("reset_sim_scope commit failed")?;
    info!(user_id, "simulation scope reset");
    Ok(())
}
