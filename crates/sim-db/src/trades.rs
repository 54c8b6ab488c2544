use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

/// Closed round trip, written only on a SELL that closes a position.
#[derive(Debug, Clone)]
pub struct NewExecutedTrade {
    pub user_id: i64,
    pub runner_id: i64,
    pub symbol: String,
    pub buy_ts: DateTime<Utc>,
    pub sell_ts: DateTime<Utc>,
    pub buy_price: f64,
    pub sell_price: f64,
    pub quantity: f64,
    pub pnl_amount: f64,
    pub pnl_percent: f64,
    pub strategy: String,
    pub timeframe: String,
}

#[derive(Debug, Clone)]
pub struct ExecutedTradeRow {
    pub id: i64,
    pub user_id: i64,
    pub runner_id: i64,
    pub symbol: String,
    pub buy_ts: DateTime<Utc>,
    pub sell_ts: DateTime<Utc>,
    pub buy_price: f64,
    pub sell_price: f64,
    pub quantity: f64,
    pub pnl_amount: f64,
    pub pnl_percent: f64,
    pub strategy: String,
    pub timeframe: String,
}

fn row_to_trade(row: &sqlx::postgres::PgRow) -> Result<ExecutedTradeRow> {
    Ok(ExecutedTradeRow {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        runner_id: row.try_get("runner_id")?,
        symbol: row.try_get("symbol")?,
        buy_ts: row.try_get("buy_ts")?,
        sell_ts: row.try_get("sell_ts")?,
        buy_price: row.try_get("buy_price")?,
        sell_price: row.try_get("sell_price")?,
        quantity: row.try_get("quantity")?,
        pnl_amount: row.try_get("pnl_amount")?,
        pnl_percent: row.try_get("pnl_percent")?,
        strategy: row.try_get("strategy")?,
        timeframe: row.try_get("timeframe")?,
    })
}

pub async fn append_executed_trade(pool: &PgPool, trade: &NewExecutedTrade) -> Result<i64> {
    let row = sqlx::query(
        r#"
        insert into executed_trades (
          user_id, runner_id, symbol, buy_ts, sell_ts, buy_price, sell_price,
          quantity, pnl_amount, pnl_percent, strategy, timeframe
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        returning id
        "#,
    )
    .bind(trade.user_id)
    .bind(trade.runner_id)
    .bind(trade.symbol.to_uppercase())
    .bind(trade.buy_ts)
    .bind(trade.sell_ts)
    .bind(trade.buy_price)
    .bind(trade.sell_price)
    .bind(trade.quantity)
    .bind(trade.pnl_amount)
    .bind(trade.pnl_percent)
    .bind(&trade.strategy)
    .bind(&trade.timeframe)
    .fetch_one(pool)
    .await
    .context("append_executed_trade failed")?;
    Ok(row.try_get("id")?)
}

/// Total closed trades for a user.
pub async fn trade_count(pool: &PgPool, user_id: i64) -> Result<i64> {
    let (n,): (i64,) =
        sqlx::query_as("select count(*)::bigint from executed_trades where user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .context("trade_count failed")?;
    Ok(n)
}

/// Closed trades for a runner ordered by `sell_ts` ascending — the order the
/// aggregator's compounding formulas expect.
pub async fn trades_for_runner(pool: &PgPool, runner_id: i64) -> Result<Vec<ExecutedTradeRow>> {
    let rows = sqlx::query(
        r#"
        select id, user_id, runner_id, symbol, buy_ts, sell_ts, buy_price,
               sell_price, quantity, pnl_amount, pnl_percent, strategy, timeframe
        from executed_trades
        where runner_id = $1
        order by sell_ts asc, id asc
        "#,
    )
    .bind(runner_id)
    .fetch_all(pool)
    .await
    .context("trades_for_runner failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(row_to_trade(row)?);
    }
    Ok(out)
}
