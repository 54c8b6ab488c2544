//! The virtual clock.
//!
//! A single-threaded cooperative loop: read the persisted run flag, tick the
//! runner engine at the cursor, advance by `step_seconds`, persist the cursor
//! every N ticks. Only one tick is ever in flight. The control surface talks
//! to the loop exclusively through `simulation_state` and the pace file.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{error, info, warn};

use sim_broker::timeframe_label;
use sim_config::SimConfig;
use sim_db::{
    ensure_account, ensure_sim_state, get_runners_by_user, load_sim_state, open_positions_for_user,
    set_account_equity, set_is_running, set_last_ts, trades_for_runner, upsert_result,
    NewAnalyticsResult,
};
use sim_metrics::{compute_kpis, runner_summary, ClosedTrade};
use sim_runner::RunnerEngine;

use crate::pace::effective_pace_seconds;

pub struct Scheduler {
    pool: PgPool,
    cfg: Arc<SimConfig>,
    user_id: i64,
    engine: RunnerEngine,
}

impl Scheduler {
    pub fn new(pool: PgPool, cfg: Arc<SimConfig>, user_id: i64, engine: RunnerEngine) -> Self {
        Self {
            pool,
            cfg,
            user_id,
            engine,
        }
    }

    /// Initial cursor: persisted `last_ts` when present, else the configured
    /// start epoch, else the earliest stored bar. No data at all is fatal.
    async fn initial_cursor(&self) -> Result<DateTime<Utc>> {
        if let Some(state) = load_sim_state(&self.pool, self.user_id).await? {
            if let Some(last_ts) = state.last_ts {
                return Ok(last_ts);
            }
        }
        if let Some(epoch) = self.cfg.timing.sim_start_epoch {
            return DateTime::from_timestamp(epoch, 0)
                .with_context(|| format!("invalid SIM_START_EPOCH {epoch}"));
        }
        self.engine
            .market_data()
            .earliest_any_timestamp(&self.pool)
            .await?
            .context("no historical data found; cannot start the simulation")
    }

    /// Main loop. Runs until `sim_end_epoch` is crossed (when configured);
    /// otherwise serves start/stop transitions forever.
    pub async fn run(mut self) -> Result<()> {
        ensure_sim_state(&self.pool, self.user_id).await?;
        let mut cursor = self.initial_cursor().await?;
        set_last_ts(&self.pool, self.user_id, Some(cursor)).await?;
        info!(%cursor, "simulation initialized");

        let end_ts = self
            .cfg
            .timing
            .sim_end_epoch
            .and_then(|e| DateTime::from_timestamp(e, 0));
        let step = chrono::Duration::seconds(self.cfg.timing.step_seconds.max(1));
        let persist_every = self.cfg.timing.persist_every_ticks.max(1);

        let mut tick_count: u64 = 0;
        let mut was_running = false;
        let mut consecutive_failures: u32 = 0;

        // A transient storage hiccup retries on the next cursor (the
        // idempotent upsert key makes replays safe); a run of failures means
        // the storage layer is actually broken, and the loop must stop in a
        // state the control surface can see.
        const MAX_CONSECUTIVE_FAILURES: u32 = 5;

        loop {
            // Respect the persisted start/stop flag; the HTTP surface (or a
            // reset) mutates it out-of-band.
            let state = load_sim_state(&self.pool, self.user_id).await?;
            let running = state
                .as_ref()
                .map(|s| s.is_running == "true")
                .unwrap_or(false);
            if !running {
                was_running = false;
                tokio::time::sleep(Duration::from_secs_f64(
                    self.cfg.timing.sleep_when_paused_secs.max(0.05),
                ))
                .await;
                continue;
            }

            // On resume, re-derive the cursor: a reset clears `last_ts`, an
            // operator may have seeded a new one.
            if !was_running {
                was_running = true;
                cursor = self.initial_cursor().await?;
                info!(%cursor, "simulation resumed");
            }

            if let Some(end) = end_ts {
                if cursor > end {
                    info!(%cursor, "reached end of simulation");
                    set_is_running(&self.pool, self.user_id, false).await?;
                    self.refresh_results(cursor).await;
                    set_last_ts(&self.pool, self.user_id, Some(cursor)).await?;
                    return Ok(());
                }
            }

            match self.engine.run_tick(&self.pool, cursor).await {
                Ok(stats) => {
                    consecutive_failures = 0;
                    tick_count += 1;
                    if tick_count % 50 == 0 {
                        info!(
                            tick = tick_count,
                            %cursor,
                            processed = stats.processed,
                            buys = stats.buys,
                            sells = stats.sells,
                            "simulation progress"
                        );
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(%cursor, error = %e, failures = consecutive_failures, "tick failed");
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        let _ = set_is_running(&self.pool, self.user_id, false).await;
                        anyhow::bail!(
                            "storage failing persistently ({consecutive_failures} consecutive ticks); loop stopped"
                        );
                    }
                }
            }

            cursor = self.advance_cursor(cursor, step).await;

            if tick_count % u64::from(persist_every) == 0 {
                if let Err(e) = set_last_ts(&self.pool, self.user_id, Some(cursor)).await {
                    warn!(error = %e, "failed to persist simulation cursor");
                }
                self.refresh_results(cursor).await;
            }

            let pace = effective_pace_seconds(
                self.cfg.timing.pace_file.as_deref(),
                self.cfg.timing.pace_seconds,
            )
            .await;
            if pace > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(pace)).await;
            }
        }
    }

    /// Next cursor value. The plain mode steps blindly by `step_seconds`
    /// (bars are queried `<= cursor`, so dead time is merely wasted ticks);
    /// the session-aware mode jumps straight to the next stored session bar,
    /// falling back to a blind step once the data runs dry.
    async fn advance_cursor(
        &self,
        cursor: DateTime<Utc>,
        step: chrono::Duration,
    ) -> DateTime<Utc> {
        if !self.cfg.timing.session_aware_clock {
            return cursor + step;
        }
        match self
            .engine
            .market_data()
            .next_session_ts(&self.pool, cursor, 5, None)
            .await
        {
            Ok(Some(next)) => next,
            Ok(None) => cursor + step,
            Err(e) => {
                warn!(error = %e, "session clock lookup failed; stepping blindly");
                cursor + step
            }
        }
    }

    /// Recompute per-runner aggregates from closed trades and upsert the
    /// result rows. Failures are logged, never fatal to the loop.
    async fn refresh_results(&self, as_of: DateTime<Utc>) {
        let runners = match get_runners_by_user(&self.pool, self.user_id, None).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "result refresh: runner load failed");
                return;
            }
        };

        for runner in runners {
            let trades = match trades_for_runner(&self.pool, runner.id).await {
                Ok(t) => t,
                Err(e) => {
                    warn!(runner_id = runner.id, error = %e, "result refresh: trade load failed");
                    continue;
                }
            };
            if trades.is_empty() {
                continue;
            }

            let closed: Vec<ClosedTrade> = trades
                .iter()
                .map(|t| ClosedTrade {
                    buy_ts: t.buy_ts,
                    sell_ts: t.sell_ts,
                    sell_price: t.sell_price,
                    quantity: t.quantity,
                    pnl_amount: t.pnl_amount,
                    pnl_percent: t.pnl_percent,
                })
                .collect();
            let summary = runner_summary(&closed);
            let kpis = compute_kpis(&closed);

            let result = NewAnalyticsResult {
                symbol: runner.stock.clone(),
                strategy: runner.strategy.clone(),
                timeframe: timeframe_label(runner.time_frame.max(1) as u32),
                start_ts: runner.time_range_from,
                end_ts: Some(as_of),
                final_pnl_amount: summary.final_pnl_amount,
                final_pnl_percent: summary.final_pnl_percent,
                trades_count: summary.trades_count as i32,
                max_drawdown: Some(kpis.max_drawdown_pct),
                avg_pnl_per_trade: Some(summary.avg_pnl_per_trade),
                avg_trade_duration_sec: summary.avg_trade_duration_sec,
            };
            if let Err(e) = upsert_result(&self.pool, &result).await {
                warn!(runner_id = runner.id, error = %e, "result upsert failed");
            }
        }

        if let Err(e) = self.mark_account_equity(as_of).await {
            warn!(error = %e, "account equity snapshot failed");
        }
    }

    /// Account snapshot: equity = cash + Σ(open qty × last close ≤ as_of).
    /// Positions without a recent close are carried at their entry price.
    async fn mark_account_equity(&self, as_of: DateTime<Utc>) -> Result<()> {
        let account = ensure_account(
            &self.pool,
            self.user_id,
            "mock",
            self.cfg.broker.starting_cash,
        )
        .await?;
        let positions = open_positions_for_user(&self.pool, self.user_id).await?;

        let mut market_value = 0.0;
        if !positions.is_empty() {
            // Intraday closes cover both timeframes well enough for a
            // snapshot; group per timeframe would double the queries.
            let mut by_symbol: BTreeMap<String, f64> = BTreeMap::new();
            for p in &positions {
                *by_symbol.entry(p.symbol.clone()).or_insert(0.0) += p.quantity;
            }
            let symbols: Vec<String> = by_symbol.keys().cloned().collect();
            let closes = self
                .engine
                .market_data()
                .last_close_for(&self.pool, &symbols, 5, as_of, true)
                .await?;
            for p in &positions {
                let mark = closes.get(&p.symbol).copied().unwrap_or(p.avg_price);
                market_value += p.quantity * mark;
            }
        }

        set_account_equity(
            &self.pool,
            self.user_id,
            "mock",
            account.cash + market_value,
        )
        .await
    }
}
