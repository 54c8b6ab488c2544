//! Mock broker: instant fills against the current bar with configurable
//! spread, slippage and commission.
//!
//! State ownership: this crate is the only writer of `open_positions`,
//! `orders`, and `executed_trades`. At most one position exists per runner
//! (`runner_id` unique). Protective exits are evaluated bar-by-bar in
//! `on_bar` — static stop first, then the trailing controller, which is
//! armed exactly once per position and activates one bar after entry.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::{debug, info, warn};

use sim_config::BrokerConfig;
use sim_db::{
    append_executed_trade, append_order, arm_trailing_fields, delete_position, get_open_position,
    insert_position, update_highest_price, NewExecutedTrade, NewOrder, NewPosition,
};
use sim_strategy::{BuyDecision, OrderType, RunnerView};

pub mod stops;

pub use stops::{evaluate_bar, quantize, trade_pnl, StopExit, StopReason, StopState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

/// Parameters for a full-position sell.
#[derive(Clone, Debug, Default)]
pub struct SellRequest {
    pub order_type: Option<OrderType>,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub reason: Option<String>,
    pub details: Option<String>,
}

/// Per-bar stop-evaluation outcome, aggregated into tick KPIs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BarOutcome {
    pub stop_cross_exits: u32,
}

/// Result of a `buy` request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuyOutcome {
    Filled,
    /// Buy-limit below the market: cannot fill.
    RejectedLimit,
    /// Non-positive quantity or price.
    Rejected,
}

/// Result of a `sell_all` request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SellOutcome {
    /// Position closed; realized P&L of the round trip.
    Filled(f64),
    /// Sell-limit above the market: cannot fill, position unchanged.
    RejectedLimit,
    /// Nothing to sell.
    NoPosition,
}

pub struct MockBroker {
    commission: f64,
    spread: f64,
    slippage: f64,
    tick: f64,
}

impl MockBroker {
    pub fn new(cfg: &BrokerConfig) -> Self {
        info!(
            commission = cfg.commission_per_trade,
            spread = cfg.bid_ask_spread,
            slippage_pct = cfg.slippage_percent * 100.0,
            "mock broker initialized"
        );
        Self {
            commission: cfg.commission_per_trade,
            spread: cfg.bid_ask_spread,
            slippage: cfg.slippage_percent,
            tick: cfg.tick_size,
        }
    }

    /// Execution-price adjustment: half-spread against the taker, then
    /// slippage, quantized to the tick.
    pub fn adjust_price(&self, price: f64, side: Side) -> f64 {
        let mut p = match side {
            Side::Buy => price + self.spread / 2.0,
            Side::Sell => price - self.spread / 2.0,
        };
        p += p * self.slippage * if side == Side::Buy { 1.0 } else { -1.0 };
        quantize(p, self.tick)
    }

    // ------------------------------------------------------------------
    // buy
    // ------------------------------------------------------------------

    /// Open (or replace) the position for this runner.
    pub async fn buy(
        &self,
        pool: &PgPool,
        user_id: i64,
        runner: &RunnerView,
        symbol: &str,
        price: f64,
        quantity: i64,
        decision: &BuyDecision,
        at: DateTime<Utc>,
    ) -> Result<BuyOutcome> {
        // A buy-limit below the market cannot fill.
        if decision.order_type == OrderType::Lmt {
            if let Some(limit) = decision.limit_price.filter(|l| *l > 0.0) {
                if price > limit {
                    return Ok(BuyOutcome::RejectedLimit);
                }
            }
        }
        if quantity <= 0 || price <= 0.0 {
            return Ok(BuyOutcome::Rejected);
        }

        // Replace any existing position deterministically: sell it first so
        // the round trip is recorded instead of silently dropped.
        if let Some(existing) = get_open_position(pool, runner.id).await? {
            warn!(
                runner_id = runner.id,
                symbol = %existing.symbol,
                "buying while already in a position; closing existing position first"
            );
            self.sell_all(
                pool,
                user_id,
                runner,
                &existing.symbol,
                price,
                &SellRequest {
                    reason: Some("strategy_override_buy".to_string()),
                    ..SellRequest::default()
                },
                at,
                Some("strategy_override_buy"),
            )
            .await?;
        }

        let exec_price = self.adjust_price(price, Side::Buy);
        let stop_price = decision
            .static_stop
            .as_ref()
            .map(|s| quantize(s.stop_price, self.tick))
            .filter(|sp| *sp > 0.0);

        insert_position(
            pool,
            &NewPosition {
                user_id,
                runner_id: runner.id,
                symbol: symbol.to_uppercase(),
                quantity: quantity as f64,
                avg_price: exec_price,
                created_at: at,
                stop_price,
            },
        )
        .await
        .context("buy: position insert failed")?;

        append_order(
            pool,
            &NewOrder {
                user_id,
                runner_id: runner.id,
                symbol: symbol.to_uppercase(),
                side: "BUY".to_string(),
                order_type: decision.order_type.as_str().to_string(),
                quantity: quantity as f64,
                limit_price: decision.limit_price.filter(|l| *l > 0.0),
                stop_price,
                status: "filled".to_string(),
                created_at: at,
                filled_at: Some(at),
                details: None,
            },
        )
        .await
        .context("buy: order append failed")?;

        debug!(
            runner_id = runner.id,
            symbol = %symbol.to_uppercase(),
            qty = quantity,
            exec_price,
            "BUY filled"
        );
        Ok(BuyOutcome::Filled)
    }

    // ------------------------------------------------------------------
    // sell_all
    // ------------------------------------------------------------------

    /// Close the open position (if any) and emit the trade.
    #[allow(clippy::too_many_arguments)]
    pub async fn sell_all(
        &self,
        pool: &PgPool,
        user_id: i64,
        runner: &RunnerView,
        _symbol: &str,
        price: f64,
        request: &SellRequest,
        at: DateTime<Utc>,
        reason_override: Option<&str>,
    ) -> Result<SellOutcome> {
        // A sell-limit above the market cannot fill.
        if request.order_type == Some(OrderType::Lmt) {
            if let Some(limit) = request.limit_price.filter(|l| *l > 0.0) {
                if price < limit {
                    return Ok(SellOutcome::RejectedLimit);
                }
            }
        }

        let Some(pos) = get_open_position(pool, runner.id).await? else {
            return Ok(SellOutcome::NoPosition);
        };

        let qty = pos.quantity;
        let avg = pos.avg_price;
        if qty <= 0.0 || avg <= 0.0 {
            // Degenerate row: drop it without fabricating a trade.
            delete_position(pool, runner.id).await?;
            return Ok(SellOutcome::NoPosition);
        }

        let exec_price = self.adjust_price(price, Side::Sell);
        let (pnl_amount, pnl_percent) = trade_pnl(exec_price, avg, qty, self.commission);

        let order_type = request.order_type.unwrap_or(OrderType::Mkt);
        append_order(
            pool,
            &NewOrder {
                user_id,
                runner_id: runner.id,
                symbol: pos.symbol.clone(),
                side: "SELL".to_string(),
                order_type: order_type.as_str().to_string(),
                quantity: qty,
                limit_price: request.limit_price.filter(|l| *l > 0.0),
                stop_price: request.stop_price.filter(|s| *s > 0.0),
                status: "filled".to_string(),
                created_at: at,
                filled_at: Some(at),
                details: request.details.clone(),
            },
        )
        .await
        .context("sell_all: order append failed")?;

        append_executed_trade(
            pool,
            &NewExecutedTrade {
                user_id,
                runner_id: runner.id,
                symbol: pos.symbol.clone(),
                buy_ts: pos.created_at,
                sell_ts: at,
                buy_price: avg,
                sell_price: exec_price,
                quantity: qty,
                pnl_amount,
                pnl_percent,
                strategy: runner.strategy.clone(),
                timeframe: timeframe_label(runner.time_frame),
            },
        )
        .await
        .context("sell_all: trade append failed")?;

        delete_position(pool, runner.id).await?;

        let reason = reason_override
            .map(str::to_string)
            .or_else(|| request.reason.clone())
            .unwrap_or_default();
        debug!(
            runner_id = runner.id,
            symbol = %pos.symbol,
            qty,
            avg_price = avg,
            exec_price,
            pnl_amount,
            %reason,
            "SELL filled"
        );
        Ok(SellOutcome::Filled(pnl_amount))
    }

    // ------------------------------------------------------------------
    // trailing controller
    // ------------------------------------------------------------------

    /// Arm exactly one trailing controller on the runner's position.
    /// Idempotent: an already-armed position is left untouched. Activation is
    /// delayed by one bar interval so the entry bar cannot stop itself out.
    pub async fn arm_trailing_stop_once(
        &self,
        pool: &PgPool,
        runner_id: i64,
        entry_price: f64,
        trail_pct: f64,
        at: DateTime<Utc>,
        interval_min: u32,
    ) -> Result<()> {
        if trail_pct <= 0.0 {
            return Ok(());
        }
        let activation_ts = at + Duration::minutes(i64::from(interval_min));
        let armed =
            arm_trailing_fields(pool, runner_id, trail_pct, entry_price, activation_ts).await?;
        if armed {
            debug!(
                runner_id,
                trail_pct, %activation_ts, "trailing stop armed"
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // on_bar
    // ------------------------------------------------------------------

    /// OHLC-aware stop enforcement for one runner against the newly arrived
    /// bar. Exits on cross, never "skips"; any exit goes through `sell_all`
    /// at the computed exit price.
    #[allow(clippy::too_many_arguments)]
    pub async fn on_bar(
        &self,
        pool: &PgPool,
        user_id: i64,
        runner: &RunnerView,
        _open: f64,
        high: f64,
        low: f64,
        _close: f64,
        at: DateTime<Utc>,
    ) -> Result<BarOutcome> {
        let mut out = BarOutcome::default();

        let Some(pos) = get_open_position(pool, runner.id).await? else {
            return Ok(out);
        };

        let mut state = StopState {
            stop_price: pos.stop_price,
            trail_percent: pos.trail_percent,
            highest_price: pos.highest_price,
            activation_ts: pos.activation_ts,
        };
        let before_high = state.highest_price;
        let exit = evaluate_bar(&mut state, high, low, at, self.tick);

        if let Some(exit) = exit {
            out.stop_cross_exits += 1;
            self.sell_all(
                pool,
                user_id,
                runner,
                &pos.symbol,
                exit.price,
                &SellRequest {
                    reason: Some(exit.reason.as_str().to_string()),
                    ..SellRequest::default()
                },
                at,
                Some(exit.reason.as_str()),
            )
            .await?;
        } else if state.highest_price != before_high {
            // No exit, but the high-water mark moved: persist the ratchet.
            if let Some(top) = state.highest_price {
                update_highest_price(pool, runner.id, top).await?;
            }
        }

        Ok(out)
    }

    /// Reserved equity/cash bookkeeping hook; intentionally a no-op.
    pub async fn mark_to_market_all(
        &self,
        _pool: &PgPool,
        _user_id: i64,
        _at: DateTime<Utc>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Trade rows label the timeframe as "5m" or "1d".
pub fn timeframe_label(tf_min: u32) -> String {
    if tf_min >= 1440 {
        "1d".to_string()
    } else {
        "5m".to_string()
    }
}
