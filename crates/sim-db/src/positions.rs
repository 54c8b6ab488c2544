//! Open-position rows. The mock broker is the only writer; `runner_id` is
//! unique so a runner can never hold more than one position.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct OpenPositionRow {
    pub id: i64,
    pub user_id: i64,
    pub runner_id: i64,
    pub symbol: String,
    pub account: String,
    pub quantity: f64,
    pub avg_price: f64,
    pub created_at: DateTime<Utc>,
    pub stop_price: Option<f64>,
    pub trail_percent: Option<f64>,
    pub highest_price: Option<f64>,
    pub activation_ts: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewPosition {
    pub user_id: i64,
    pub runner_id: i64,
    pub symbol: String,
    pub quantity: f64,
    pub avg_price: f64,
    pub created_at: DateTime<Utc>,
    pub stop_price: Option<f64>,
}

fn row_to_position(row: &sqlx::postgres::PgRow) -> Result<OpenPositionRow> {
    Ok(OpenPositionRow {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        runner_id: row.try_get("runner_id")?,
        symbol: row.try_get("symbol")?,
        account: row.try_get("account")?,
        quantity: row.try_get("quantity")?,
        avg_price: row.try_get("avg_price")?,
        created_at: row.try_get("created_at")?,
        stop_price: row.try_get("stop_price")?,
        trail_percent: row.try_get("trail_percent")?,
        highest_price: row.try_get("highest_price")?,
        activation_ts: row.try_get("activation_ts")?,
    })
}

pub async fn get_open_position(pool: &PgPool, runner_id: i64) -> Result<Option<OpenPositionRow>> {
    let row = sqlx::query(
        r#"
        select id, user_id, runner_id, symbol, account, quantity, avg_price,
               created_at, stop_price, trail_percent, highest_price, activation_ts
        from open_positions
        where runner_id = $1
        "#,
    )
    .bind(runner_id)
    .fetch_optional(pool)
    .await
    .context("get_open_position failed")?;

    row.as_ref().map(row_to_position).transpose()
}

pub async fn insert_position(pool: &PgPool, pos: &NewPosition) -> Result<i64> {
    let row = sqlx::query(
        r#"
        insert into open_positions (
          user_id, runner_id, symbol, account, quantity, avg_price,
          created_at, stop_price
        ) values ($1, $2, $3, 'mock', $4, $5, $6, $7)
        returning id
        "#,
    )
    .bind(pos.user_id)
    .bind(pos.runner_id)
    .bind(pos.symbol.to_uppercase())
    .bind(pos.quantity)
    .bind(pos.avg_price)
    .bind(pos.created_at)
    .bind(pos.stop_price)
    .fetch_one(pool)
    .await
    .context("insert_position failed")?;
    Ok(row.try_get("id")?)
}

pub async fn delete_position(pool: &PgPool, runner_id: i64) -> Result<bool> {
    let res = sqlx::query("delete from open_positions where runner_id = $1")
        .bind(runner_id)
        .execute(pool)
        .await
        .context("delete_position failed")?;
    Ok(res.rows_affected() > 0)
}

/// Arm the trailing controller once: no-op when `trail_percent` is already
/// positive (single controller per position).
pub async fn arm_trailing_fields(
    pool: &PgPool,
    runner_id: i64,
    trail_percent: f64,
    highest_price: f64,
    activation_ts: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update open_positions
        set trail_percent = $2,
            highest_price = $3,
            activation_ts = $4
        where runner_id = $1
          and coalesce(trail_percent, 0) <= 0
        "#,
    )
    .bind(runner_id)
    .bind(trail_percent)
    .bind(highest_price)
    .bind(activation_ts)
    .execute(pool)
    .await
    .context("arm_trailing_fields failed")?;
    Ok(res.rows_affected() > 0)
}

/// Ratchet the trailing high-water mark; never lowers it.
pub async fn update_highest_price(pool: &PgPool, runner_id: i64, highest: f64) -> Result<()> {
    sqlx::query(
        r#"
        update open_positions
        set highest_price = greatest(coalesce(highest_price, 0), $2)
        where runner_id = $1
        "#,
    )
    .bind(runner_id)
    .bind(highest)
    .execute(pool)
    .await
    .context("update_highest_price failed")?;
    Ok(())
}

/// All open positions for a user, ordered by symbol.
pub async fn open_positions_for_user(
    pool: &PgPool,
    user_id: i64,
) -> Result<Vec<OpenPositionRow>> {
    let rows = sqlx::query(
        r#"
        select id, user_id, runner_id, symbol, account, quantity, avg_price,
               created_at, stop_price, trail_percent, highest_price, activation_ts
        from open_positions
        where user_id = $1
        order by symbol asc, runner_id asc
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("open_positions_for_user failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(row_to_position(row)?);
    }
    Ok(out)
}

pub async fn open_position_count(pool: &PgPool, user_id: i64) -> Result<i64> {
    let (n,): (i64,) =
        sqlx::query_as("select count(*)::bigint from open_positions where user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .context("open_position_count failed")?;
    Ok(n)
}
