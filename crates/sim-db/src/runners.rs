use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RunnerRow {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub strategy: String,
    pub stock: String,
    pub time_frame: i32,
    pub parameters: Value,
    pub budget: f64,
    pub current_budget: f64,
    pub activation: String,
    pub exit_strategy: String,
    pub time_range_from: Option<DateTime<Utc>>,
    pub time_range_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewRunner {
    pub user_id: i64,
    pub name: String,
    pub strategy: String,
    pub stock: String,
    pub time_frame: i32,
    pub parameters: Value,
    pub budget: f64,
}

fn row_to_runner(row: &sqlx::postgres::PgRow) -> Result<RunnerRow> {
    Ok(RunnerRow {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        strategy: row.try_get("strategy")?,
        stock: row.try_get("stock")?,
        time_frame: row.try_get("time_frame")?,
        parameters: row.try_get("parameters")?,
        budget: row.try_get("budget")?,
        current_budget: row.try_get("current_budget")?,
        activation: row.try_get("activation")?,
        exit_strategy: row.try_get("exit_strategy")?,
        time_range_from: row.try_get("time_range_from")?,
        time_range_to: row.try_get("time_range_to")?,
    })
}

/// Runners for a user, optionally filtered by activation state.
pub async fn get_runners_by_user(
    pool: &PgPool,
    user_id: i64,
    activation: Option<&str>,
) -> Result<Vec<RunnerRow>> {
    let rows = match activation {
        Some(act) => sqlx::query(
            r#"
            select id, user_id, name, strategy, stock, time_frame, parameters,
                   budget, current_budget, activation, exit_strategy,
                   time_range_from, time_range_to
            from runners
            where user_id = $1 and activation = $2
            order by id asc
            "#,
        )
        .bind(user_id)
        .bind(act)
        .fetch_all(pool)
        .await
        .context("get_runners_by_user (filtered) failed")?,
        None => sqlx::query(
            r#"
            select id, user_id, name, strategy, stock, time_frame, parameters,
                   budget, current_budget, activation, exit_strategy,
                   time_range_from, time_range_to
            from runners
            where user_id = $1
            order by id asc
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .context("get_runners_by_user failed")?,
    };

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(row_to_runner(row)?);
    }
    Ok(out)
}

/// Create a runner. Returns `Ok(None)` when the `(user_id, stock)` uniqueness
/// among non-removed runners blocks the insert (bootstrap treats that as a
/// skip, not an error).
pub async fn create_runner(pool: &PgPool, runner: &NewRunner) -> Result<Option<i64>> {
    let res = sqlx::query(
        r#"
        insert into runners (
          user_id, name, strategy, stock, time_frame, parameters,
          budget, current_budget, activation, exit_strategy
        ) values ($1, $2, $3, $4, $5, $6, $7, $7, 'active', 'hold_forever')
        returning id
        "#,
    )
    .bind(runner.user_id)
    .bind(&runner.name)
    .bind(&runner.strategy)
    .bind(runner.stock.to_uppercase())
    .bind(runner.time_frame)
    .bind(&runner.parameters)
    .bind(runner.budget)
    .fetch_one(pool)
    .await;

    match res {
        Ok(row) => Ok(Some(row.try_get("id")?)),
        Err(e) => {
            if is_unique_violation(&e, "uq_runners_user_stock_live") {
                debug!(name = %runner.name, "runner creation skipped: symbol already owned");
                return Ok(None);
            }
            Err(anyhow::Error::new(e).context("create_runner failed"))
        }
    }
}

/// Flip a runner's activation state (e.g. to "inactive" after a time exit).
pub async fn set_runner_activation(pool: &PgPool, runner_id: i64, activation: &str) -> Result<()> {
    sqlx::query("update runners set activation = $2 where id = $1")
        .bind(runner_id)
        .bind(activation)
        .execute(pool)
        .await
        .context("set_runner_activation failed")?;
    Ok(())
}

/// Distinct symbols across a user's runners (any activation).
pub async fn runner_symbols(pool: &PgPool, user_id: i64) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "select distinct stock from runners where user_id = $1 order by stock asc",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("runner_symbols failed")?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(row.try_get::<String, _>("stock")?);
    }
    Ok(out)
}

fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.constraint() == Some(constraint)
                || (db_err.code().as_deref() == Some("23505")
                    && db_err.constraint() == Some(constraint))
        }
        _ => false,
    }
}
