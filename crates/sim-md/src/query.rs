//! SQL access for the bar tables.
//!
//! Daily bars live in `daily_bars` keyed `(symbol, ts)` where `ts` is the UTC
//! instant of ET midnight for the session day (raw UTC midnight from older
//! writers is tolerated because every read is a `<= as_of` range scan).
//! Minute bars live in `minute_bars` keyed `(symbol, ts, interval_min)`.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, warn};

use crate::session::{is_regular_market_minute, ny_session_bounds};
use crate::{Bar, DAILY_TF_MIN};

/// Forward-scan bound for the session clock, in ET days.
const NEXT_SESSION_SCAN_DAYS: u32 = 400;

/// Historical data gateway. Holds only the preferred session-clock symbol;
/// every query borrows the shared pool.
#[derive(Clone, Debug)]
pub struct MarketData {
    clock_symbol: String,
}

impl MarketData {
    pub fn new(reference_clock_symbol: impl Into<String>) -> Self {
        Self {
            clock_symbol: reference_clock_symbol.into().to_uppercase(),
        }
    }

    // ------------------------------------------------------------------
    // Coverage helpers
    // ------------------------------------------------------------------

    pub async fn has_minute(&self, pool: &PgPool, symbol: &str, tf_min: u32) -> Result<bool> {
        Ok(self.earliest_minute(pool, symbol, tf_min).await?.is_some())
    }

    pub async fn has_daily(&self, pool: &PgPool, symbol: &str) -> Result<bool> {
        Ok(self.earliest_daily(pool, symbol).await?.is_some())
    }

    pub async fn earliest_daily(
        &self,
        pool: &PgPool,
        symbol: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let (ts,): (Option<DateTime<Utc>>,) =
            sqlx::query_as("select min(ts) from daily_bars where symbol = $1")
                .bind(symbol.to_uppercase())
                .fetch_one(pool)
                .await
                .context("earliest_daily query failed")?;
        Ok(ts)
    }

    pub async fn earliest_minute(
        &self,
        pool: &PgPool,
        symbol: &str,
        tf_min: u32,
    ) -> Result<Option<DateTime<Utc>>> {
        let (ts,): (Option<DateTime<Utc>>,) = sqlx::query_as(
            "select min(ts) from minute_bars where symbol = $1 and interval_min = $2",
        )
        .bind(symbol.to_uppercase())
        .bind(tf_min as i32)
        .fetch_one(pool)
        .await
        .context("earliest_minute query failed")?;
        Ok(ts)
    }

    pub async fn latest_minute(
        &self,
        pool: &PgPool,
        symbol: &str,
        tf_min: u32,
    ) -> Result<Option<DateTime<Utc>>> {
        let (ts,): (Option<DateTime<Utc>>,) = sqlx::query_as(
            "select max(ts) from minute_bars where symbol = $1 and interval_min = $2",
        )
        .bind(symbol.to_uppercase())
        .bind(tf_min as i32)
        .fetch_one(pool)
        .await
        .context("latest_minute query failed")?;
        Ok(ts)
    }

    /// Earliest bar for the pair, timeframe-appropriate table. Used by the
    /// coverage scan that quarantines impossible pairs.
    pub async fn earliest_bar(
        &self,
        pool: &PgPool,
        symbol: &str,
        tf_min: u32,
    ) -> Result<Option<DateTime<Utc>>> {
        if tf_min >= DAILY_TF_MIN {
            self.earliest_daily(pool, symbol).await
        } else {
            self.earliest_minute(pool, symbol, tf_min).await
        }
    }

    /// Distinct symbols with daily coverage, ascending. Drives the runner
    /// bootstrap.
    pub async fn distinct_daily_symbols(&self, pool: &PgPool) -> Result<Vec<String>> {
        let rows = sqlx::query("select distinct symbol from daily_bars order by symbol asc")
            .fetch_all(pool)
            .await
            .context("distinct_daily_symbols query failed")?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.try_get::<String, _>("symbol")?);
        }
        Ok(out)
    }

    /// Global minimum timestamp across minute and daily bars; the scheduler's
    /// initial cursor when no explicit start is configured.
    pub async fn earliest_any_timestamp(&self, pool: &PgPool) -> Result<Option<DateTime<Utc>>> {
        let (t_min,): (Option<DateTime<Utc>>,) =
            sqlx::query_as("select min(ts) from minute_bars")
                .fetch_one(pool)
                .await
                .context("earliest minute scan failed")?;
        let (t_daily,): (Option<DateTime<Utc>>,) =
            sqlx::query_as("select min(ts) from daily_bars")
                .fetch_one(pool)
                .await
                .context("earliest daily scan failed")?;
        Ok(match (t_min, t_daily) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        })
    }

    // ------------------------------------------------------------------
    // Single-symbol window
    // ------------------------------------------------------------------

    /// Up to `lookback` bars at/before `as_of`, oldest→newest. Intraday
    /// queries over-fetch 3× when filtering to regular hours, then trim.
    /// `rth_only` is ignored for the daily timeframe.
    pub async fn bars_until(
        &self,
        pool: &PgPool,
        symbol: &str,
        tf_min: u32,
        as_of: DateTime<Utc>,
        lookback: i64,
        rth_only: bool,
    ) -> Result<Vec<Bar>> {
        let symbol = symbol.to_uppercase();

        if tf_min >= DAILY_TF_MIN {
            let rows = sqlx::query(
                r#"
                select ts, open, high, low, close, volume
                from daily_bars
                where symbol = $1 and ts <= $2
                order by ts desc
                limit $3
                "#,
            )
            .bind(&symbol)
            .bind(as_of)
            .bind(lookback)
            .fetch_all(pool)
            .await
            .context("daily bars_until query failed")?;

            let mut out = rows_to_bars(rows)?;
            out.reverse();
            return Ok(out);
        }

        let raw_limit = if rth_only { lookback * 3 } else { lookback };
        let rows = sqlx::query(
            r#"
            select ts, open, high, low, close, volume
            from minute_bars
            where symbol = $1 and interval_min = $2 and ts <= $3
            order by ts desc
            limit $4
            "#,
        )
        .bind(&symbol)
        .bind(tf_min as i32)
        .bind(as_of)
        .bind(raw_limit)
        .fetch_all(pool)
        .await
        .context("minute bars_until query failed")?;

        let mut out = rows_to_bars(rows)?;
        out.reverse();
        if rth_only {
            out.retain(|b| is_regular_market_minute(b.ts));
            if out.len() as i64 > lookback {
                out.drain(..out.len() - lookback as usize);
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Bulk windows
    // ------------------------------------------------------------------

    /// Per-symbol windows for many symbols in one window-ranked query.
    /// Output map always contains every requested symbol (possibly empty).
    pub async fn bars_bulk_until(
        &self,
        pool: &PgPool,
        symbols: &[String],
        tf_min: u32,
        as_of: DateTime<Utc>,
        lookback: i64,
        rth_only: bool,
    ) -> Result<HashMap<String, Vec<Bar>>> {
        let mut out: HashMap<String, Vec<Bar>> = HashMap::new();
        if symbols.is_empty() {
            return Ok(out);
        }
        let syms: Vec<String> = symbols.iter().map(|s| s.to_uppercase()).collect();
        for s in &syms {
            out.entry(s.clone()).or_default();
        }

        if tf_min >= DAILY_TF_MIN {
            let rows = sqlx::query(
                r#"
                select symbol, ts, open, high, low, close, volume
                from (
                    select symbol, ts, open, high, low, close, volume,
                           row_number() over (partition by symbol order by ts desc) as rn
                    from daily_bars
                    where symbol = any($1) and ts <= $2
                ) ranked
                where rn <= $3
                order by symbol asc, ts asc
                "#,
            )
            .bind(&syms)
            .bind(as_of)
            .bind(lookback)
            .fetch_all(pool)
            .await
            .context("daily bars_bulk_until query failed")?;

            for row in rows {
                let symbol: String = row.try_get("symbol")?;
                out.entry(symbol).or_default().push(row_to_bar(&row)?);
            }
            return Ok(out);
        }

        let raw_limit = if rth_only { lookback * 3 } else { lookback };
        let rows = sqlx::query(
            r#"
            select symbol, ts, open, high, low, close, volume
            from (
                select symbol, ts, open, high, low, close, volume,
                       row_number() over (partition by symbol order by ts desc) as rn
                from minute_bars
                where symbol = any($1) and interval_min = $2 and ts <= $3
            ) ranked
            where rn <= $4
            order by symbol asc, ts asc
            "#,
        )
        .bind(&syms)
        .bind(tf_min as i32)
        .bind(as_of)
        .bind(raw_limit)
        .fetch_all(pool)
        .await
        .context("minute bars_bulk_until query failed")?;

        for row in rows {
            let symbol: String = row.try_get("symbol")?;
            let bar = row_to_bar(&row)?;
            if !rth_only || is_regular_market_minute(bar.ts) {
                out.entry(symbol).or_default().push(bar);
            }
        }

        if rth_only {
            for bars in out.values_mut() {
                if bars.len() as i64 > lookback {
                    bars.drain(..bars.len() - lookback as usize);
                }
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Mark-to-market helper
    // ------------------------------------------------------------------

    /// Most recent close at/before `as_of` per symbol. Symbols with no
    /// eligible bar are omitted.
    pub async fn last_close_for(
        &self,
        pool: &PgPool,
        symbols: &[String],
        tf_min: u32,
        as_of: DateTime<Utc>,
        rth_only: bool,
    ) -> Result<HashMap<String, f64>> {
        let mut out = HashMap::new();
        if symbols.is_empty() {
            return Ok(out);
        }
        let syms: Vec<String> = symbols.iter().map(|s| s.to_uppercase()).collect();

        if tf_min >= DAILY_TF_MIN {
            let rows = sqlx::query(
                r#"
                select symbol, close
                from (
                    select symbol, close,
                           row_number() over (partition by symbol order by ts desc) as rn
                    from daily_bars
                    where symbol = any($1) and ts <= $2
                ) ranked
                where rn = 1
                "#,
            )
            .bind(&syms)
            .bind(as_of)
            .fetch_all(pool)
            .await
            .context("daily last_close_for query failed")?;
            for row in rows {
                out.insert(row.try_get("symbol")?, row.try_get::<f64, _>("close")?);
            }
            return Ok(out);
        }

        // Pull a few recent rows per symbol so the RTH filter can still find
        // an eligible close when the absolute latest bar is extended-hours.
        let rows = sqlx::query(
            r#"
            select symbol, ts, close
            from (
                select symbol, ts, close,
                       row_number() over (partition by symbol order by ts desc) as rn
                from minute_bars
                where symbol = any($1) and interval_min = $2 and ts <= $3
            ) ranked
            where rn <= 3
            order by symbol asc, ts desc
            "#,
        )
        .bind(&syms)
        .bind(tf_min as i32)
        .bind(as_of)
        .fetch_all(pool)
        .await
        .context("minute last_close_for query failed")?;

        for row in rows {
            let symbol: String = row.try_get("symbol")?;
            if out.contains_key(&symbol) {
                continue;
            }
            let ts: DateTime<Utc> = row.try_get("ts")?;
            if rth_only && !is_regular_market_minute(ts) {
                continue;
            }
            out.insert(symbol, row.try_get::<f64, _>("close")?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Session clock
    // ------------------------------------------------------------------

    /// Smallest stored minute-bar timestamp strictly greater than `as_of`
    /// that lies inside NY regular hours, preferring the configured clock
    /// symbol and falling back to any symbol at the interval. Holidays and
    /// DST are transparently correct because only timestamps that exist in
    /// storage are returned. `None` once the 400-day forward scan runs dry.
    pub async fn next_session_ts(
        &self,
        pool: &PgPool,
        as_of: DateTime<Utc>,
        tf_min: u32,
        reference_symbol: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>> {
        let clock_sym = reference_symbol
            .map(str::to_uppercase)
            .unwrap_or_else(|| self.clock_symbol.clone());
        let epsilon = Duration::seconds(1);

        let mut day = as_of.with_timezone(&chrono_tz::America::New_York).date_naive();
        for _ in 0..NEXT_SESSION_SCAN_DAYS {
            let (open_utc, close_utc) = ny_session_bounds(day);

            if as_of >= close_utc {
                day = day.succ_opt().context("calendar overflow")?;
                continue;
            }
            let search_from = (as_of + epsilon).max(open_utc);
            if search_from > close_utc {
                day = day.succ_opt().context("calendar overflow")?;
                continue;
            }

            // Preferred clock symbol first.
            let mut next_ts: Option<DateTime<Utc>> = None;
            if !clock_sym.is_empty() {
                let (ts,): (Option<DateTime<Utc>>,) = sqlx::query_as(
                    r#"
                    select min(ts) from minute_bars
                    where symbol = $1 and interval_min = $2 and ts >= $3 and ts <= $4
                    "#,
                )
                .bind(&clock_sym)
                .bind(tf_min as i32)
                .bind(search_from)
                .bind(close_utc)
                .fetch_one(pool)
                .await
                .context("next_session_ts clock query failed")?;
                next_ts = ts;
            }

            // Global fallback: any symbol inside the same RTH window.
            if next_ts.is_none() {
                let (ts,): (Option<DateTime<Utc>>,) = sqlx::query_as(
                    r#"
                    select min(ts) from minute_bars
                    where interval_min = $1 and ts >= $2 and ts <= $3
                    "#,
                )
                .bind(tf_min as i32)
                .bind(search_from)
                .bind(close_utc)
                .fetch_one(pool)
                .await
                .context("next_session_ts fallback query failed")?;
                if ts.is_some() {
                    debug!(
                        tf_min,
                        clock = %clock_sym,
                        "next_session_ts: global fallback, clock symbol had no bar"
                    );
                }
                next_ts = ts;
            }

            if let Some(ts) = next_ts {
                return Ok(Some(ts));
            }

            // No bars in this session: holiday or a coverage hole. Move on.
            day = day.succ_opt().context("calendar overflow")?;
        }

        warn!(
            tf_min,
            as_of = %as_of,
            "next_session_ts: no further bars within {} days",
            NEXT_SESSION_SCAN_DAYS
        );
        Ok(None)
    }
}

fn row_to_bar(row: &sqlx::postgres::PgRow) -> Result<Bar> {
    Ok(Bar {
        ts: row.try_get("ts")?,
        open: row.try_get("open")?,
        high: row.try_get("high")?,
        low: row.try_get("low")?,
        close: row.try_get("close")?,
        volume: row.try_get("volume")?,
    })
}

fn rows_to_bars(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<Bar>> {
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(row_to_bar(row)?);
    }
    Ok(out)
}
