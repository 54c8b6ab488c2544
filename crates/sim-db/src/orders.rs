use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

/// Append-only synthetic order row written by the mock broker.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: i64,
    pub runner_id: i64,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub quantity: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub details: Option<String>,
}

pub async fn append_order(pool: &PgPool, order: &NewOrder) -> Result<i64> {
    let row = sqlx::query(
        r#"
        insert into orders (
          user_id, runner_id, symbol, side, order_type, quantity,
          limit_price, stop_price, status, created_at, filled_at, details
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        returning id
        "#,
    )
    .bind(order.user_id)
    .bind(order.runner_id)
    .bind(order.symbol.to_uppercase())
    .bind(&order.side)
    .bind(&order.order_type)
    .bind(order.quantity)
    .bind(order.limit_price)
    .bind(order.stop_price)
    .bind(&order.status)
    .bind(order.created_at)
    .bind(order.filled_at)
    .bind(&order.details)
    .fetch_one(pool)
    .await
    .context("append_order failed")?;
    Ok(row.try_get("id")?)
}
