//! The tick engine.
//!
//! Ordering guarantees within a runner: broker stop evaluation → strategy
//! call → broker order → execution record. Across runners within a tick the
//! order is nondeterministic (bounded fan-out); global ordering only holds
//! between ticks via the monotonic cycle sequence.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use sim_broker::{BuyOutcome, MockBroker, SellOutcome, SellRequest};
use sim_config::SimConfig;
use sim_db::{
    bulk_upsert_runner_executions, ensure_account, get_open_position, get_runners_by_user,
    get_user_by_username, set_account_cash, ExecRecord, OpenPositionRow, RunnerRow,
};
use sim_health::HealthGate;
use sim_md::{et_day_of, is_stale_candle, Bar, MarketData, DAILY_TF_MIN};
use sim_strategy::{
    parse_decision, Decision, DecisionCtx, OrderType, PositionView, RunnerView, StaticStopSpec,
    StrategyRegistry, ValidationEnv,
};
use sim_universe::UniverseGate;

use crate::guards::{
    bar_advanced, choose_trail_pct, next_cooldown, qty_from_budget, same_bar_goes_to_summary,
};
use crate::records::{round6, RecordCtx};

pub const ANALYTICS_USERNAME: &str = "analytics";

// ---------------------------------------------------------------------------
// Tick statistics
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    pub processed: u64,
    pub buys: u64,
    pub sells: u64,
    pub no_action: u64,
    pub skipped_no_data: u64,
    pub skipped_no_budget: u64,
    pub errors: u64,
    pub post_tick_errors: u64,
}

impl TickStats {
    fn merge(&mut self, other: &TickStats) {
        self.processed += other.processed;
        self.buys += other.buys;
        self.sells += other.sells;
        self.no_action += other.no_action;
        self.skipped_no_data += other.skipped_no_data;
        self.skipped_no_budget += other.skipped_no_budget;
        self.errors += other.errors;
        self.post_tick_errors += other.post_tick_errors;
    }
}

// ---------------------------------------------------------------------------
// Worker plumbing
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
enum HealthNote {
    NoData,
    Error,
    Clean,
}

struct WorkerOutcome {
    runner_id: i64,
    tf: u32,
    symbol: String,
    records: Vec<ExecRecord>,
    stats: TickStats,
    new_last_bar_ts: Option<DateTime<Utc>>,
    new_cooldown: Option<u32>,
    same_bar_skipped: bool,
    no_candles: bool,
    warn_no_data: Option<String>,
    health: Option<HealthNote>,
}

struct WorkerShared {
    pool: PgPool,
    broker: Arc<MockBroker>,
    registry: StrategyRegistry,
    mkt: MarketData,
    cache: Arc<HashMap<(String, u32), Vec<Bar>>>,
    cfg: Arc<SimConfig>,
    env: ValidationEnv,
    user_id: i64,
    cycle_seq: i64,
    as_of: DateTime<Utc>,
}

struct RunnerJob {
    view: RunnerView,
    data_symbol: String,
    canonical_strategy: String,
    prev_bar_ts: Option<DateTime<Utc>>,
    cooldown_left: u32,
    x_hours_fallback: bool,
    already_warned_no_data: bool,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct RunnerEngine {
    cfg: Arc<SimConfig>,
    mkt: MarketData,
    broker: Arc<MockBroker>,
    universe: UniverseGate,
    health: HealthGate,
    registry: StrategyRegistry,
    env: ValidationEnv,
    /// The run's virtual start; health coverage is judged against it.
    sim_start: DateTime<Utc>,
    last_bar_ts: HashMap<(i64, u32), DateTime<Utc>>,
    cooldown: HashMap<(i64, u32), u32>,
    warned_no_data: HashSet<(String, u32, NaiveDate)>,
}

impl RunnerEngine {
    pub fn new(cfg: SimConfig, registry: StrategyRegistry, sim_start: DateTime<Utc>) -> Self {
        let env = match std::env::var("RUNNING_ENV") {
            Ok(v) if !v.eq_ignore_ascii_case("analytics") => ValidationEnv::Live,
            _ => ValidationEnv::Analytics,
        };
        let mkt = MarketData::new(cfg.engine.reference_clock_symbol.clone());
        let broker = Arc::new(MockBroker::new(&cfg.broker));
        let universe = UniverseGate::new(cfg.universe.clone());
        let health = HealthGate::new(cfg.health);
        Self {
            cfg: Arc::new(cfg),
            mkt,
            broker,
            universe,
            health,
            registry,
            env,
            sim_start,
            last_bar_ts: HashMap::new(),
            cooldown: HashMap::new(),
            warned_no_data: HashSet::new(),
        }
    }

    pub fn market_data(&self) -> &MarketData {
        &self.mkt
    }

    /// One decision tick across all active runners at virtual instant
    /// `as_of`. Per-runner failures are absorbed into the stats; only
    /// tick-fatal problems (no DB, prefetch failure) surface as errors.
    pub async fn run_tick(&mut self, pool: &PgPool, as_of: DateTime<Utc>) -> Result<TickStats> {
        let cycle_seq = as_of.timestamp();
        let mut stats = TickStats::default();

        let Some(user) = get_user_by_username(pool, ANALYTICS_USERNAME).await? else {
            warn!("no analytics user found yet");
            return Ok(stats);
        };
        let uid = user.id;

        // Keep the mock account funded; the simulator is not a cash model.
        match ensure_account(pool, uid, "mock", self.cfg.broker.starting_cash).await {
            Ok(acct) => {
                if acct.cash < self.cfg.engine.min_cash_floor {
                    if let Err(e) =
                        set_account_cash(pool, uid, "mock", self.cfg.engine.topup_cash_to).await
                    {
                        error!(error = %e, "failed to top up mock account cash");
                    } else {
                        info!(
                            previous = acct.cash,
                            topped_to = self.cfg.engine.topup_cash_to,
                            "topped up mock account cash"
                        );
                    }
                }
            }
            Err(e) => error!(error = %e, "ensure_account failed"),
        }

        let rows = get_runners_by_user(pool, uid, Some("active")).await?;
        let runners: Vec<RunnerView> = rows.iter().map(snapshot_runner).collect();
        if runners.is_empty() {
            return Ok(stats);
        }

        // Universe hygiene: evaluated once per run against the active set.
        let symbols: Vec<String> = runners.iter().map(|r| r.stock.clone()).collect();
        let universe_ok = match self.universe.ensure_loaded(&symbols, &self.mkt, pool).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "universe evaluation failed; proceeding without filter");
                false
            }
        };

        // One-time coverage scan: quarantine pairs whose data cannot cover
        // the run at all.
        if self.health.begin_bootstrap() {
            self.bootstrap_coverage(pool, &runners, as_of).await;
        }

        let cache = Arc::new(self.prefetch_candles(pool, &runners, as_of).await?);
        let x_fallback = self.extended_hours_fallback(pool, &cache, as_of).await;
        let cache = if x_fallback.is_empty() {
            cache
        } else {
            // Rebuild the cache with the fallback windows patched in.
            let mut patched = (*cache).clone();
            for (key, bars) in &x_fallback {
                patched.insert(key.clone(), bars.clone());
            }
            Arc::new(patched)
        };
        let x_fallback_keys: HashSet<(String, u32)> = x_fallback.into_keys().collect();

        // Build jobs on the engine task: universe/health/strategy admission
        // happens here so the gates' state is mutated single-threaded.
        let et_day = et_day_of(as_of);
        let mut jobs: Vec<RunnerJob> = Vec::new();
        let mut records: Vec<ExecRecord> = Vec::new();

        for r in runners {
            let tf = r.time_frame;
            let rec = RecordCtx {
                runner: &r,
                user_id: uid,
                cycle_seq,
                as_of,
            };

            if universe_ok && !self.universe.is_allowed(&r.stock) {
                let details = if self.cfg.engine.thin_no_action_details {
                    None
                } else {
                    Some(json!({"reason": self.universe.reason_for(&r.stock)}).to_string())
                };
                records.push(rec.completed("skipped-excluded-universe", details));
                stats.no_action += 1;
                stats.processed += 1;
                continue;
            }

            let Some(canonical) = self.registry.resolve_key(&r.strategy) else {
                records.push(rec.skipped(
                    "skipped-unknown-strategy",
                    "unknown_strategy",
                    Some(json!({"strategy": r.strategy}).to_string()),
                ));
                stats.no_action += 1;
                stats.processed += 1;
                continue;
            };

            let (health_excluded, health_reason) = self.health.is_excluded(&r.stock, tf, as_of);
            if health_excluded {
                let details = if self.cfg.engine.thin_no_action_details {
                    None
                } else {
                    Some(json!({"health": health_reason}).to_string())
                };
                records.push(rec.skipped("skipped-no-data", "health_excluded", details));
                stats.skipped_no_data += 1;
                stats.processed += 1;
                continue;
            }

            let data_symbol = self.universe.map_symbol(&r.stock);
            jobs.push(RunnerJob {
                prev_bar_ts: self.last_bar_ts.get(&(r.id, tf)).copied(),
                cooldown_left: self.cooldown.get(&(r.id, tf)).copied().unwrap_or(0),
                x_hours_fallback: x_fallback_keys.contains(&(data_symbol.clone(), tf)),
                already_warned_no_data: self
                    .warned_no_data
                    .contains(&(r.stock.clone(), tf, et_day)),
                data_symbol,
                canonical_strategy: canonical,
                view: r,
            });
        }

        // Bounded fan-out: at most `runner_parallelism` runners in flight.
        let shared = Arc::new(WorkerShared {
            pool: pool.clone(),
            broker: Arc::clone(&self.broker),
            registry: self.registry.clone(),
            mkt: self.mkt.clone(),
            cache,
            cfg: Arc::clone(&self.cfg),
            env: self.env,
            user_id: uid,
            cycle_seq,
            as_of,
        });
        let semaphore = Arc::new(Semaphore::new(self.cfg.engine.runner_parallelism.max(1)));
        let mut join_set: JoinSet<WorkerOutcome> = JoinSet::new();

        for job in jobs {
            let shared = Arc::clone(&shared);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                evaluate_runner(shared, job).await
            });
        }

        let mut same_bar_summary: BTreeMap<(i64, u32), u32> = BTreeMap::new();
        let mut no_candles_by_tf: BTreeMap<u32, BTreeSet<String>> = BTreeMap::new();

        while let Some(joined) = join_set.join_next().await {
            let outcome = match joined {
                Ok(o) => o,
                Err(e) => {
                    error!(error = %e, "runner worker panicked");
                    stats.errors += 1;
                    continue;
                }
            };

            stats.merge(&outcome.stats);
            records.extend(outcome.records);

            let key = (outcome.runner_id, outcome.tf);
            if let Some(ts) = outcome.new_last_bar_ts {
                self.last_bar_ts.insert(key, ts);
            }
            if let Some(cd) = outcome.new_cooldown {
                if cd > 0 {
                    self.cooldown.insert(key, cd);
                } else {
                    self.cooldown.remove(&key);
                }
            }
            if outcome.same_bar_skipped {
                *same_bar_summary.entry(key).or_insert(0) += 1;
            }
            if outcome.no_candles {
                no_candles_by_tf
                    .entry(outcome.tf)
                    .or_default()
                    .insert(outcome.symbol.clone());
            }
            if let Some(msg) = outcome.warn_no_data {
                let warn_key = (outcome.symbol.clone(), outcome.tf, et_day);
                if self.warned_no_data.insert(warn_key) {
                    warn!("{msg}");
                }
            }
            match outcome.health {
                Some(HealthNote::NoData) => {
                    self.health
                        .note_no_data(&outcome.symbol, outcome.tf, as_of, et_day)
                }
                Some(HealthNote::Error) => {
                    self.health
                        .note_error(&outcome.symbol, outcome.tf, as_of, et_day)
                }
                Some(HealthNote::Clean) => self.health.mark_clean_pass(&outcome.symbol, outcome.tf),
                None => {}
            }
        }

        // One summary line per tick instead of a row per same-bar skip.
        if self.cfg.engine.summarize_same_bar && !same_bar_summary.is_empty() {
            let summary_items: Vec<Value> = same_bar_summary
                .iter()
                .map(|((rid, tf), n)| json!({"runner_id": rid, "tf": tf, "skipped": n}))
                .collect();
            let summary_value = Value::Array(summary_items);
            info!(
                cycle = cycle_seq,
                reason = "skipped-same-bar-summary",
                summary = %summary_value,
                "same-bar skips summarized"
            );
        }
        for (tf, syms) in &no_candles_by_tf {
            let sample: Vec<&str> = syms.iter().take(8).map(String::as_str).collect();
            info!(
                tf_min = *tf,
                count = syms.len(),
                sample = ?sample,
                "symbols had no bars at this tick"
            );
        }

        // Batch persist: one idempotent upsert per tick.
        if !records.is_empty() {
            if let Err(e) = bulk_upsert_runner_executions(pool, records).await {
                error!(error = %e, "bulk upsert of runner executions failed");
                stats.post_tick_errors += 1;
            }
        }

        if let Err(e) = self.broker.mark_to_market_all(pool, uid, as_of).await {
            error!(error = %e, "mark-to-market after tick failed");
            stats.post_tick_errors += 1;
        }

        debug!(
            %as_of,
            processed = stats.processed,
            buys = stats.buys,
            sells = stats.sells,
            no_action = stats.no_action,
            skipped_no_data = stats.skipped_no_data,
            skipped_no_budget = stats.skipped_no_budget,
            errors = stats.errors,
            post_tick_errors = stats.post_tick_errors,
            "tick complete"
        );
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // Tick setup helpers
    // ------------------------------------------------------------------

    /// Coverage is judged against the run's virtual start, but the
    /// exclusion TTL is anchored off the scan's current tick time — the scan
    /// can re-run mid-stream after a restart, and a TTL anchored at
    /// `sim_start` would already have lapsed.
    async fn bootstrap_coverage(
        &mut self,
        pool: &PgPool,
        runners: &[RunnerView],
        now: DateTime<Utc>,
    ) {
        let mut seen: HashSet<(String, u32)> = HashSet::new();
        for r in runners {
            let key = (r.stock.to_uppercase(), r.time_frame);
            if !seen.insert(key.clone()) {
                continue;
            }
            let data_symbol = self.universe.map_symbol(&r.stock);
            let earliest = match self.mkt.earliest_bar(pool, &data_symbol, r.time_frame).await {
                Ok(e) => e,
                Err(e) => {
                    warn!(symbol = %key.0, error = %e, "coverage scan query failed");
                    continue;
                }
            };
            match earliest {
                None => {
                    self.health
                        .exclude_coverage(&key.0, r.time_frame, None, now);
                    info!(symbol = %key.0, tf_min = r.time_frame, "health gate: EXCLUDED (no coverage at all)");
                }
                Some(first) if first > self.sim_start => {
                    self.health
                        .exclude_coverage(&key.0, r.time_frame, Some(first), now);
                    info!(
                        symbol = %key.0,
                        tf_min = r.time_frame,
                        earliest = %first,
                        sim_start = %self.sim_start,
                        "health gate: EXCLUDED (coverage starts after sim start)"
                    );
                }
                Some(_) => {}
            }
        }
    }

    async fn prefetch_candles(
        &self,
        pool: &PgPool,
        runners: &[RunnerView],
        as_of: DateTime<Utc>,
    ) -> Result<HashMap<(String, u32), Vec<Bar>>> {
        let mut by_tf: BTreeMap<u32, BTreeSet<String>> = BTreeMap::new();
        for r in runners {
            by_tf
                .entry(r.time_frame)
                .or_default()
                .insert(self.universe.map_symbol(&r.stock));
        }

        let mut cache: HashMap<(String, u32), Vec<Bar>> = HashMap::new();
        for (tf, syms) in by_tf {
            let rth = tf < DAILY_TF_MIN && self.cfg.engine.regular_hours_only;
            let symbols: Vec<String> = syms.into_iter().collect();
            let data = self
                .mkt
                .bars_bulk_until(pool, &symbols, tf, as_of, self.cfg.engine.lookback_bars, rth)
                .await
                .context("candle prefetch failed")?;
            // Bulk query guarantees an entry per requested symbol, so empty
            // windows are visible to the fallback pass below.
            for (symbol, bars) in data {
                cache.insert((symbol, tf), bars);
            }
        }
        Ok(cache)
    }

    /// One-shot retry for empty intraday windows: when RTH filtering drained
    /// everything but coverage exists, take extended-hours bars instead.
    /// Affected executions are tagged `x_hours_fallback` for traceability.
    async fn extended_hours_fallback(
        &self,
        pool: &PgPool,
        cache: &HashMap<(String, u32), Vec<Bar>>,
        as_of: DateTime<Utc>,
    ) -> HashMap<(String, u32), Vec<Bar>> {
        let mut out = HashMap::new();
        if !self.cfg.engine.regular_hours_only {
            return out;
        }
        for ((symbol, tf), bars) in cache {
            if !bars.is_empty() || *tf >= DAILY_TF_MIN {
                continue;
            }
            match self.mkt.has_minute(pool, symbol, *tf).await {
                Ok(true) => {}
                _ => continue,
            }
            match self
                .mkt
                .bars_until(pool, symbol, *tf, as_of, self.cfg.engine.lookback_bars, false)
                .await
            {
                Ok(alt) if !alt.is_empty() => {
                    debug!(symbol = %symbol, tf_min = *tf, "extended-hours fallback window used");
                    out.insert((symbol.clone(), *tf), alt);
                }
                Ok(_) => {}
                Err(e) => warn!(symbol = %symbol, error = %e, "extended-hours fallback query failed"),
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

async fn evaluate_runner(shared: Arc<WorkerShared>, job: RunnerJob) -> WorkerOutcome {
    let runner_id = job.view.id;
    let tf = job.view.time_frame;
    let symbol = job.view.stock.to_uppercase();

    let mut outcome = WorkerOutcome {
        runner_id,
        tf,
        symbol: symbol.clone(),
        records: Vec::new(),
        stats: TickStats::default(),
        new_last_bar_ts: None,
        new_cooldown: None,
        same_bar_skipped: false,
        no_candles: false,
        warn_no_data: None,
        health: None,
    };

    match evaluate_runner_inner(&shared, &job, &mut outcome).await {
        Ok(()) => {}
        Err(e) => {
            error!(
                runner = %job.view.name,
                error = %e,
                "runner tick failed"
            );
            let rec = RecordCtx {
                runner: &job.view,
                user_id: shared.user_id,
                cycle_seq: shared.cycle_seq,
                as_of: shared.as_of,
            };
            outcome
                .records
                .push(rec.error("exception", Some("see logs".to_string())));
            outcome.stats.errors += 1;
            outcome.stats.processed += 1;
            outcome.health = Some(HealthNote::Error);
        }
    }
    outcome
}

async fn evaluate_runner_inner(
    shared: &WorkerShared,
    job: &RunnerJob,
    out: &mut WorkerOutcome,
) -> Result<()> {
    let cfg = &shared.cfg.engine;
    let r = &job.view;
    let tf = r.time_frame;
    let as_of = shared.as_of;
    let rec = RecordCtx {
        runner: r,
        user_id: shared.user_id,
        cycle_seq: shared.cycle_seq,
        as_of,
    };
    let thin = cfg.thin_no_action_details;

    let empty: Vec<Bar> = Vec::new();
    let candles: &Vec<Bar> = shared
        .cache
        .get(&(job.data_symbol.clone(), tf))
        .unwrap_or(&empty);

    if candles.is_empty() {
        if !job.already_warned_no_data {
            out.warn_no_data = Some(no_data_warning(shared, job, as_of).await);
        }
        out.no_candles = true;
        out.health = Some(HealthNote::NoData);
        out.records.push(rec.skipped(
            "skipped-no-data",
            "insufficient_candles",
            if thin {
                None
            } else {
                Some(json!({"message": "no candles available at as_of", "tf": tf}).to_string())
            },
        ));
        out.stats.skipped_no_data += 1;
        out.stats.processed += 1;
        return Ok(());
    }

    let last = candles.last().expect("non-empty");
    let last_ts = last.ts;

    // Stale candle: do not ping the broker, so stops are never evaluated
    // against frozen prices.
    if cfg.skip_stale_price && is_stale_candle(Some(last_ts), tf, as_of) {
        out.records.push(rec.completed(
            "skipped-stale-price",
            if thin {
                None
            } else {
                Some(
                    json!({
                        "message": "last candle is stale for timeframe",
                        "tf_min": tf,
                        "last_ts": last_ts.to_rfc3339(),
                        "as_of": as_of.to_rfc3339(),
                    })
                    .to_string(),
                )
            },
        ));
        out.stats.no_action += 1;
        out.stats.processed += 1;
        return Ok(());
    }

    out.health = Some(HealthNote::Clean);
    let price = last.close;

    // Broker first: armed stops see the fresh bar before any new signal.
    let bar_outcome = shared
        .broker
        .on_bar(
            &shared.pool,
            shared.user_id,
            r,
            last.open,
            last.high,
            last.low,
            last.close,
            as_of,
        )
        .await?;
    let stop_exit = bar_outcome.stop_cross_exits > 0;
    if stop_exit {
        out.records.push(rec.completed(
            "sell",
            Some(
                json!({"message": "broker_stop_triggered", "price": round6(price)}).to_string(),
            ),
        ));
        out.stats.sells += 1;
        out.stats.processed += 1;
    }

    // Time-based exit: an "expired date" runner past its window flattens
    // whatever is open and goes inactive, regardless of bar advancement.
    if r.exit_strategy.to_lowercase().contains("expired date") {
        if let Some(until) = r.time_range_to {
            if as_of > until {
                let position = get_open_position(&shared.pool, r.id).await?;
                if position.is_some() {
                    let request = SellRequest {
                        reason: Some("expired_date".to_string()),
                        ..SellRequest::default()
                    };
                    match shared
                        .broker
                        .sell_all(
                            &shared.pool,
                            shared.user_id,
                            r,
                            &r.stock,
                            price,
                            &request,
                            as_of,
                            Some("expired_date"),
                        )
                        .await?
                    {
                        SellOutcome::Filled(_) => {
                            out.records.push(rec.completed(
                                "sell",
                                Some(
                                    json!({"message": "time_exit", "reason": "expired_date"})
                                        .to_string(),
                                ),
                            ));
                            out.stats.sells += 1;
                        }
                        _ => {
                            out.records.push(rec.error(
                                "expired_date_not_filled",
                                Some(json!({"message": "time_exit"}).to_string()),
                            ));
                            out.stats.errors += 1;
                        }
                    }
                } else {
                    out.records.push(rec.completed(
                        "expired_date",
                        if thin {
                            None
                        } else {
                            Some(json!({"message": "time_exit_no_position"}).to_string())
                        },
                    ));
                    out.stats.no_action += 1;
                }
                sim_db::set_runner_activation(&shared.pool, r.id, "inactive").await?;
                out.stats.processed += 1;
                out.new_last_bar_ts = Some(last_ts);
                return Ok(());
            }
        }
    }

    // Bar-advance guard + cooldown accounting.
    let advanced = bar_advanced(job.prev_bar_ts, Some(last_ts));
    let cooldown = next_cooldown(
        job.cooldown_left,
        stop_exit,
        advanced,
        cfg.cooldown_after_stop_bars,
    );
    out.new_cooldown = Some(cooldown);

    if !advanced && cfg.require_bar_advance {
        if same_bar_goes_to_summary(tf, cfg.summarize_same_bar, cfg.suppress_daily_same_bar) {
            out.same_bar_skipped = true;
        } else {
            out.records.push(rec.completed(
                "skipped-same-bar",
                if thin {
                    None
                } else {
                    Some(
                        json!({
                            "message": "bar has not advanced; ignoring strategy signals this tick",
                            "tf_min": tf,
                            "last_bar_ts": last_ts.to_rfc3339(),
                            "prev_bar_ts": job.prev_bar_ts.map(|t| t.to_rfc3339()),
                            "as_of": as_of.to_rfc3339(),
                        })
                        .to_string(),
                    )
                },
            ));
        }
        out.stats.no_action += 1;
        out.stats.processed += 1;
        out.new_last_bar_ts = Some(last_ts);
        return Ok(());
    }

    // Position after the broker pass (a stop may have just closed it).
    let position = get_open_position(&shared.pool, r.id).await?;
    let position_view = position.as_ref().map(position_to_view);

    let strategy = shared
        .registry
        .get(&job.canonical_strategy)
        .context("strategy disappeared from registry")?;

    let ctx = DecisionCtx {
        runner: r,
        position: position_view.as_ref(),
        current_price: price,
        candles,
        distance_from_time_limit: r.time_range_to.map(|t| (t - as_of).num_seconds()),
    };
    let raw = if position_view.is_some() {
        strategy.decide_sell(&ctx)
    } else {
        strategy.decide_buy(&ctx)
    };

    let parsed = parse_decision(&raw, position_view.is_some(), shared.env);
    let mut decision = match parsed {
        Ok(d) => d,
        Err(e) => {
            out.records.push(rec.skipped(
                "skipped-build_failed",
                &e.to_string(),
                if thin { None } else { Some(raw.to_string()) },
            ));
            out.stats.no_action += 1;
            out.stats.processed += 1;
            out.new_last_bar_ts = Some(last_ts);
            return Ok(());
        }
    };

    // Analytics mode: inject a static stop from runner parameters when the
    // strategy supplied no protection at all.
    if let Decision::Buy(buy) = &mut decision {
        if buy.trail_stop.is_none() && buy.static_stop.is_none() {
            let sl_pct = r.param_f64("default_stop_loss_percent", 0.0);
            if sl_pct > 0.0 {
                let stop = (price * (1.0 - sl_pct / 100.0) * 1e4).round() / 1e4;
                buy.static_stop = Some(StaticStopSpec {
                    order_type: OrderType::Stop,
                    stop_price: stop,
                    limit_price: None,
                });
            }
        }
    }

    let details_json = decision_details(
        &raw,
        price,
        position_view.is_some(),
        tf,
        last_ts,
        (job.data_symbol != r.stock).then_some(job.data_symbol.as_str()),
        job.x_hours_fallback,
    )
    .to_string();

    match decision {
        Decision::Buy(buy) if position_view.is_none() => {
            if cooldown > 0 {
                out.records.push(rec.completed(
                    "skipped-cooldown",
                    if thin {
                        None
                    } else {
                        Some(json!({"cooldown_bars_left": cooldown}).to_string())
                    },
                ));
                out.stats.no_action += 1;
            } else {
                let qty = match buy.quantity.filter(|q| *q > 0) {
                    Some(q) => q,
                    None => qty_from_budget(cfg.unit_budget, price),
                };
                if qty <= 0 {
                    out.records.push(rec.skipped(
                        "skipped-no-budget",
                        "qty=0",
                        if thin {
                            None
                        } else {
                            Some(json!({"reason": "qty=0"}).to_string())
                        },
                    ));
                    out.stats.skipped_no_budget += 1;
                } else {
                    match shared
                        .broker
                        .buy(&shared.pool, shared.user_id, r, &r.stock, price, qty, &buy, as_of)
                        .await?
                    {
                        BuyOutcome::Filled => {
                            let trail =
                                choose_trail_pct(&buy, r, tf, cfg.min_intraday_trail_pct);
                            if trail > 0.0 {
                                shared
                                    .broker
                                    .arm_trailing_stop_once(
                                        &shared.pool,
                                        r.id,
                                        price,
                                        trail,
                                        as_of,
                                        tf,
                                    )
                                    .await?;
                            }
                            out.records.push(rec.completed("buy", Some(details_json)));
                            out.stats.buys += 1;
                        }
                        BuyOutcome::RejectedLimit => {
                            out.records.push(rec.skipped(
                                "skipped-limit-not-marketable",
                                "buy_limit_below_market",
                                if thin { None } else { Some(details_json) },
                            ));
                            out.stats.skipped_no_budget += 1;
                        }
                        BuyOutcome::Rejected => {
                            out.records.push(rec.skipped(
                                "skipped-no-budget",
                                "broker_rejected_buy",
                                if thin { None } else { Some(details_json) },
                            ));
                            out.stats.skipped_no_budget += 1;
                        }
                    }
                }
            }
        }

        Decision::Sell(sell) if position_view.is_some() => {
            let reason = sell
                .reason
                .clone()
                .or_else(|| sell.explanation.clone())
                .unwrap_or_else(|| "strategy_sell".to_string());
            let request = SellRequest {
                order_type: Some(sell.order_type),
                limit_price: sell.limit_price,
                stop_price: sell.stop_price,
                reason: Some(reason.clone()),
                details: Some(raw.to_string()),
            };
            match shared
                .broker
                .sell_all(
                    &shared.pool,
                    shared.user_id,
                    r,
                    &r.stock,
                    price,
                    &request,
                    as_of,
                    Some(&reason),
                )
                .await?
            {
                SellOutcome::Filled(_) => {
                    out.records.push(rec.completed("sell", Some(details_json)));
                    out.stats.sells += 1;
                }
                SellOutcome::RejectedLimit => {
                    out.records.push(rec.skipped(
                        "skipped-limit-not-marketable",
                        "sell_limit_above_market",
                        if thin { None } else { Some(details_json) },
                    ));
                    out.stats.no_action += 1;
                }
                SellOutcome::NoPosition => {
                    out.records
                        .push(rec.error("broker_sell_failed", Some(details_json)));
                    out.stats.errors += 1;
                }
            }
        }

        other => {
            // NO_ACTION, or an action that does not fit the position state.
            let reason = other
                .raw()
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("no_action")
                .to_string();
            out.records.push(rec.completed(
                &reason,
                if thin { None } else { Some(details_json) },
            ));
            out.stats.no_action += 1;
        }
    }

    out.stats.processed += 1;
    out.new_last_bar_ts = Some(last_ts);
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn snapshot_runner(row: &RunnerRow) -> RunnerView {
    RunnerView {
        id: row.id,
        user_id: row.user_id,
        name: row.name.clone(),
        strategy: row.strategy.clone(),
        stock: row.stock.to_uppercase(),
        time_frame: row.time_frame.max(1) as u32,
        parameters: row.parameters.clone(),
        budget: row.budget,
        current_budget: row.current_budget,
        exit_strategy: row.exit_strategy.clone(),
        activation: row.activation.clone(),
        time_range_from: row.time_range_from,
        time_range_to: row.time_range_to,
    }
}

fn position_to_view(pos: &OpenPositionRow) -> PositionView {
    PositionView {
        runner_id: pos.runner_id,
        symbol: pos.symbol.clone(),
        quantity: pos.quantity,
        avg_price: pos.avg_price,
        created_at: pos.created_at,
        stop_price: pos.stop_price,
        trail_percent: pos.trail_percent,
        highest_price: pos.highest_price,
        activation_ts: pos.activation_ts,
    }
}

/// Execution-detail payload for decided ticks: price, position flag, decision
/// fields (minus the action), plus traceability tags.
fn decision_details(
    raw: &Value,
    price: f64,
    position_open: bool,
    tf: u32,
    last_ts: DateTime<Utc>,
    mapped_symbol: Option<&str>,
    x_hours_fallback: bool,
) -> Value {
    let decision_fields: Map<String, Value> = raw
        .as_object()
        .map(|m| {
            m.iter()
                .filter(|(k, _)| k.as_str() != "action")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();

    let mut payload = json!({
        "price": round6(price),
        "position_open": position_open,
        "timeframe_min": tf,
        "stale": false,
        "last_ts": last_ts.to_rfc3339(),
        "decision": Value::Object(decision_fields),
        "checks": raw.get("checks").cloned().unwrap_or(Value::Null),
    });
    if let Some(mapped) = mapped_symbol {
        payload["mapped_symbol"] = Value::String(mapped.to_string());
    }
    if x_hours_fallback {
        payload["x_hours_fallback"] = Value::Bool(true);
    }
    payload
}

/// Once-per-(symbol, tf, ET-day) diagnostic for missing candles, enriched
/// with the coverage window.
async fn no_data_warning(shared: &WorkerShared, job: &RunnerJob, as_of: DateTime<Utc>) -> String {
    let r = &job.view;
    let tf = r.time_frame;
    let has_cov = if tf >= DAILY_TF_MIN {
        shared
            .mkt
            .has_daily(&shared.pool, &r.stock)
            .await
            .unwrap_or(false)
    } else {
        shared
            .mkt
            .has_minute(&shared.pool, &r.stock, tf)
            .await
            .unwrap_or(false)
    };
    let (earliest, latest) = if tf < DAILY_TF_MIN {
        (
            shared
                .mkt
                .earliest_minute(&shared.pool, &job.data_symbol, tf)
                .await
                .ok()
                .flatten(),
            shared
                .mkt
                .latest_minute(&shared.pool, &job.data_symbol, tf)
                .await
                .ok()
                .flatten(),
        )
    } else {
        (None, None)
    };

    let range = format!(
        "range=[{}, {}]",
        earliest.map(|t| t.to_rfc3339()).unwrap_or_else(|| "None".to_string()),
        latest.map(|t| t.to_rfc3339()).unwrap_or_else(|| "None".to_string()),
    );
    let mut msg = format!(
        "no historical candles for {} (data_sym={}) tf={}m at {} (coverage={}) {}",
        r.stock,
        job.data_symbol,
        tf,
        as_of.to_rfc3339(),
        has_cov,
        range
    );
    if !has_cov {
        msg.push_str(" - likely pre-IPO or outside data coverage; skipping");
    }
    msg
}
