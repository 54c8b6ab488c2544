//! Environment configuration for the simulator.
//!
//! Every knob has a default; `SimConfig::from_env()` reads the process
//! environment exactly once at startup and the resulting struct is passed
//! around by reference. Nothing here touches the environment afterwards, so
//! the engine stays deterministic for a given boot.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;

pub mod env;

use env::{env_bool, env_f64, env_i64, env_opt_i64, env_opt_string, env_string, env_u32, env_usize};

// ---------------------------------------------------------------------------
// Timing (scheduler / clock)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct TimingConfig {
    /// Virtual-clock advancement per tick, seconds.
    pub step_seconds: i64,
    /// Optional wall-clock sleep between ticks, seconds (0 = run flat out).
    pub pace_seconds: f64,
    /// Wall-clock sleep while `is_running != "true"`, seconds.
    pub sleep_when_paused_secs: f64,
    /// Override for the initial cursor (epoch seconds).
    pub sim_start_epoch: Option<i64>,
    /// Terminate once the cursor passes this instant (epoch seconds).
    pub sim_end_epoch: Option<i64>,
    /// Persist `last_ts` (and refresh aggregates) every N ticks.
    pub persist_every_ticks: u32,
    /// Optional pace override file: JSON `{enabled: bool, pace_seconds?: f64}`.
    pub pace_file: Option<PathBuf>,
    /// Advance the cursor to the next stored session bar instead of stepping
    /// blindly through nights and weekends.
    pub session_aware_clock: bool,
}

impl TimingConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            step_seconds: env_i64("SIM_STEP_SECONDS", 300)?,
            pace_seconds: env_f64("SIM_PACE_SECONDS", 0.0)?,
            sleep_when_paused_secs: env_f64("SIM_SLEEP_WHEN_PAUSED", 1.0)?,
            sim_start_epoch: env_opt_i64("SIM_START_EPOCH")?,
            sim_end_epoch: env_opt_i64("SIM_END_EPOCH")?,
            persist_every_ticks: env_u32("SIM_PERSIST_EVERY_TICKS", 10)?,
            pace_file: env_opt_string("SIM_PACE_FILE").map(PathBuf::from),
            session_aware_clock: env_bool("SIM_SESSION_AWARE_CLOCK", false),
        })
    }
}

// ---------------------------------------------------------------------------
// Engine (runner service)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Max concurrent runner evaluations per tick.
    pub runner_parallelism: usize,
    /// Fixed per-runner budget (USD) used to size BUY quantities.
    pub unit_budget: f64,
    /// Top the mock account up when cash falls below this floor.
    pub min_cash_floor: f64,
    pub topup_cash_to: f64,
    /// Candle lookback per bulk fetch.
    pub lookback_bars: i64,
    /// Ignore strategy signals until the bar has advanced.
    pub require_bar_advance: bool,
    /// Intraday queries restricted to NY regular hours by default.
    pub regular_hours_only: bool,
    /// Skip the runner entirely when the latest candle is stale.
    pub skip_stale_price: bool,
    /// Advanced bars to wait after a broker stop-out before the next BUY.
    pub cooldown_after_stop_bars: u32,
    /// Floor for trailing stops armed on intraday timeframes, percent.
    pub min_intraday_trail_pct: f64,
    /// Drop verbose detail payloads from NO_ACTION execution rows.
    pub thin_no_action_details: bool,
    /// Collapse same-bar skips into one summary log line per tick.
    pub summarize_same_bar: bool,
    /// Do not record per-row same-bar skips for the daily timeframe.
    pub suppress_daily_same_bar: bool,
    /// Emit a debug log line per NO_ACTION (noisy; off by default).
    pub log_no_action: bool,
    /// Preferred session-clock symbol for `next_session_ts`.
    pub reference_clock_symbol: String,
    /// Bootstrap: per-runner budget when seeding runners.
    pub default_budget: f64,
    /// Bootstrap: cap on seeded symbols (0 = all).
    pub symbol_limit: usize,
}

impl EngineConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            runner_parallelism: env_usize("SIM_RUNNER_PARALLELISM", 8)?,
            unit_budget: env_f64("SIM_RUNNER_UNIT_BUDGET", 2000.0)?,
            min_cash_floor: env_f64("SIM_MIN_CASH", 5_000_000.0)?,
            topup_cash_to: env_f64("SIM_TOPUP_CASH_TO", 10_000_000.0)?,
            lookback_bars: env_i64("SIM_LOOKBACK_BARS", 300)?,
            require_bar_advance: env_bool("SIM_REQUIRE_BAR_ADVANCE", true),
            regular_hours_only: env_bool("SIM_REGULAR_HOURS_ONLY", true),
            skip_stale_price: env_bool("SIM_SKIP_STALE_PRICE", true),
            cooldown_after_stop_bars: env_u32("SIM_COOLDOWN_BARS_AFTER_STOP", 3)?,
            min_intraday_trail_pct: env_f64("SIM_MIN_INTRADAY_TRAIL_PCT", 1.25)?,
            thin_no_action_details: env_bool("SIM_THIN_NO_ACTION_DETAILS", true),
            summarize_same_bar: env_bool("SIM_SUMMARIZE_SAME_BAR", true),
            // Recording daily same-bar rows is opt-in, hence the inversion.
            suppress_daily_same_bar: !env_bool("SIM_LOG_DAILY_SAMEBAR", false),
            log_no_action: env_bool("SIM_LOG_NO_ACTION", false),
            reference_clock_symbol: env_string("SIM_REFERENCE_CLOCK_SYMBOL", "SPY").to_uppercase(),
            default_budget: env_f64("SIM_DEFAULT_BUDGET", 10_000.0)?,
            symbol_limit: env_usize("SIM_SYMBOL_LIMIT", 0)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Broker (simulation realism)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Flat commission charged per fill (applied twice per round trip).
    pub commission_per_trade: f64,
    /// Full bid/ask spread; half is applied per side.
    pub bid_ask_spread: f64,
    /// Fractional slippage, e.g. 0.0005 = 0.05%.
    pub slippage_percent: f64,
    /// Execution prices are quantized to this tick.
    pub tick_size: f64,
    /// Mock account seed cash.
    pub starting_cash: f64,
}

impl BrokerConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            commission_per_trade: env_f64("SIM_COMMISSION_PER_TRADE", 1.00)?,
            bid_ask_spread: env_f64("SIM_BID_ASK_SPREAD", 0.01)?,
            slippage_percent: env_f64("SIM_SLIPPAGE_PERCENT", 0.0005)?,
            tick_size: env_f64("SIM_TICK_SIZE", 0.01)?,
            starting_cash: env_f64("SIM_STARTING_CASH", 10_000_000.0)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Health gate
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct HealthConfig {
    pub ttl_days: i64,
    pub degrade_threshold: u32,
    pub exclude_threshold_sessions: u32,
    pub window_days: usize,
}

impl HealthConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            ttl_days: env_i64("HEALTH_TTL_DAYS", 5)?,
            degrade_threshold: env_u32("HEALTH_DEGRADE_THRESHOLD", 3)?,
            exclude_threshold_sessions: env_u32("HEALTH_EXCLUDE_THRESHOLD_SESSIONS", 10)?,
            window_days: env_usize("HEALTH_WINDOW_DAYS", 5)?,
        })
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ttl_days: 5,
            degrade_threshold: 3,
            exclude_threshold_sessions: 10,
            window_days: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Universe gate
// ---------------------------------------------------------------------------

/// Symbols first listed after `UNIVERSE_EXCLUDE_POST_IPO_DEFAULT` that must
/// never enter a pre-cutoff backtest even when a rename hides the gap.
const EXCLUDE_POST_IPO_DEFAULT: &str = "ABNB,APP,ARM,CEG,GFS,KVUE,WBD,VTRS,TKO,RVTY";

/// Static rename map: runner symbol -> data symbol.
const ALIAS_MAP_DEFAULT: &str =
    "META:FB,ELV:ANTM,BALL:BLL,AXON:AAXN,EG:RE,WTW:WLTW,DAY:CDAY,RVTY:PKI,VTRS:MYL,WBD:DISCA";

#[derive(Clone, Debug)]
pub struct UniverseConfig {
    /// Earliest daily bar must be on/before this date.
    pub cutoff_date: NaiveDate,
    /// Runner symbol -> historical data symbol (e.g. META -> FB).
    pub alias_map: BTreeMap<String, String>,
    /// Symbols denied outright as post-IPO regardless of coverage.
    pub exclude_post_ipo: BTreeSet<String>,
    /// Symbols denied for known minute-data gaps.
    pub patch_exclude_minutes: BTreeSet<String>,
    /// Optional allowlist file, one symbol per line.
    pub snapshot_path: Option<PathBuf>,
}

impl UniverseConfig {
    fn from_env() -> Result<Self> {
        let cutoff_raw = env_string("UNIVERSE_CUTOFF_DATE", "2020-09-18");
        let cutoff_date = NaiveDate::parse_from_str(cutoff_raw.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid UNIVERSE_CUTOFF_DATE: {cutoff_raw}"))?;

        Ok(Self {
            cutoff_date,
            alias_map: parse_alias_map(&env_string("UNIVERSE_ALIAS_MAP", ALIAS_MAP_DEFAULT)),
            exclude_post_ipo: parse_symbol_set(&env_string(
                "EXCLUDE_POST_IPO",
                EXCLUDE_POST_IPO_DEFAULT,
            )),
            patch_exclude_minutes: parse_symbol_set(&env_string("UNIVERSE_EXCLUDE_MINUTES", "")),
            snapshot_path: env_opt_string("UNIVERSE_SNAPSHOT_PATH").map(PathBuf::from),
        })
    }
}

/// Parse `"META:FB,ELV:ANTM"` into an uppercase rename map.
/// Malformed pairs are dropped.
pub fn parse_alias_map(raw: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for pair in raw.split(',') {
        let Some((k, v)) = pair.split_once(':') else {
            continue;
        };
        let k = k.trim().to_uppercase();
        let v = v.trim().to_uppercase();
        if !k.is_empty() && !v.is_empty() {
            out.insert(k, v);
        }
    }
    out
}

/// Parse a comma-separated symbol list into an uppercase set.
pub fn parse_symbol_set(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct SimConfig {
    pub timing: TimingConfig,
    pub engine: EngineConfig,
    pub broker: BrokerConfig,
    pub health: HealthConfig,
    pub universe: UniverseConfig,
}

impl SimConfig {
    /// Read the full configuration from the environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            timing: TimingConfig::from_env()?,
            engine: EngineConfig::from_env()?,
            broker: BrokerConfig::from_env()?,
            health: HealthConfig::from_env()?,
            universe: UniverseConfig::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_map_parses_pairs_and_skips_garbage() {
        let m = parse_alias_map("META:FB, elv:antm ,BROKEN,:X,Y:");
        assert_eq!(m.get("META").map(String::as_str), Some("FB"));
        assert_eq!(m.get("ELV").map(String::as_str), Some("ANTM"));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn symbol_set_uppercases_and_trims() {
        let s = parse_symbol_set("abnb, App ,,ARM");
        assert!(s.contains("ABNB"));
        assert!(s.contains("APP"));
        assert!(s.contains("ARM"));
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn default_alias_map_covers_known_renames() {
        let m = parse_alias_map(ALIAS_MAP_DEFAULT);
        assert_eq!(m.get("META").map(String::as_str), Some("FB"));
        assert_eq!(m.get("WBD").map(String::as_str), Some("DISCA"));
    }
}
