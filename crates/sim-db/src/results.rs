use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

/// Aggregated per-(symbol, strategy, timeframe) result row.
#[derive(Debug, Clone)]
pub struct NewAnalyticsResult {
    pub symbol: String,
    pub strategy: String,
    pub timeframe: String,
    pub start_ts: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
    pub final_pnl_amount: f64,
    pub final_pnl_percent: f64,
    pub trades_count: i32,
    pub max_drawdown: Option<f64>,
    pub avg_pnl_per_trade: Option<f64>,
    pub avg_trade_duration_sec: Option<f64>,
}

pub async fn upsert_result(pool: &PgPool, result: &NewAnalyticsResult) -> Result<()> {
    sqlx::query(
        r#"
        insert into analytics_results (
          symbol, strategy, timeframe, start_ts, end_ts,
          final_pnl_amount, final_pnl_percent, trades_count,
          max_drawdown, avg_pnl_per_trade, avg_trade_duration_sec, updated_at
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, now())
        on conflict (symbol, strategy, timeframe) do update
          set start_ts               = excluded.start_ts,
              end_ts                 = excluded.end_ts,
              final_pnl_amount       = excluded.final_pnl_amount,
              final_pnl_percent      = excluded.final_pnl_percent,
              trades_count           = excluded.trades_count,
              max_drawdown           = excluded.max_drawdown,
              avg_pnl_per_trade      = excluded.avg_pnl_per_trade,
              avg_trade_duration_sec = excluded.avg_trade_duration_sec,
              updated_at             = now()
        "#,
    )
    .bind(result.symbol.to_uppercase())
    .bind(&result.strategy)
    .bind(&result.timeframe)
    .bind(result.start_ts)
    .bind(result.end_ts)
    .bind(result.final_pnl_amount)
    .bind(result.final_pnl_percent)
    .bind(result.trades_count)
    .bind(result.max_drawdown)
    .bind(result.avg_pnl_per_trade)
    .bind(result.avg_trade_duration_sec)
    .execute(pool)
    .await
    .context("upsert_result failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct AnalyticsResultRow {
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
    pub updated_at: DateTime<Utc>,
}

/// All aggregated results, best realized P&L first.
pub async fn list_results(pool: &PgPool) -> Result<Vec<AnalyticsResultRow>> {
    let rows = sqlx::query(
        r#"
        select symbol, strategy, timeframe, start_ts, end_ts,
               final_pnl_amount, final_pnl_percent, trades_count,
               max_drawdown, avg_pnl_per_trade, avg_trade_duration_sec, updated_at
        from analytics_results
        order by final_pnl_amount desc nulls last, symbol asc
        "#,
    )
    .fetch_all(pool)
    .await
    .context("list_results failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(AnalyticsResultRow {
            symbol: row.try_get("symbol")?,
            strategy: row.try_get("strategy")?,
            timeframe: row.try_get("timeframe")?,
            start_ts: row.try_get("start_ts")?,
            end_ts: row.try_get("end_ts")?,
            final_pnl_amount: row.try_get("final_pnl_amount")?,
            final_pnl_percent: row.try_get("final_pnl_percent")?,
            trades_count: row.try_get("trades_count")?,
            max_drawdown: row.try_get("max_drawdown")?,
            avg_pnl_per_trade: row.try_get("avg_pnl_per_trade")?,
            avg_trade_duration_sec: row.try_get("avg_trade_duration_sec")?,
            updated_at: row.try_get("updated_at")?,
        });
    }
    Ok(out)
}
