//! First-boot provisioning: the analytics user, its simulation-state row,
//! the funded mock account, and — when the user owns no runners yet — a
//! seeded population of one runner per (symbol × strategy × timeframe).

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};

use sim_config::SimConfig;
use sim_db::{
    create_runner, ensure_account, ensure_sim_state, get_or_create_user, get_runners_by_user,
    NewRunner, UserRow,
};
use sim_md::MarketData;
use sim_runner::engine::ANALYTICS_USERNAME;
use sim_strategy::StrategyRegistry;

const TIMEFRAMES: [(i32, &str); 2] = [(5, "5m"), (1440, "1d")];

pub async fn bootstrap(
    pool: &PgPool,
    cfg: &SimConfig,
    registry: &StrategyRegistry,
    mkt: &MarketData,
) -> Result<UserRow> {
    let user = get_or_create_user(pool, ANALYTICS_USERNAME, "analytics@example.com")
        .await
        .context("analytics user bootstrap failed")?;

    ensure_sim_state(pool, user.id).await?;
    ensure_account(pool, user.id, "mock", cfg.broker.starting_cash).await?;

    let existing = get_runners_by_user(pool, user.id, None).await?;
    if existing.is_empty() {
        bootstrap_runners(pool, cfg, registry, mkt, user.id).await?;
    }

    Ok(user)
}

/// Seed one runner per (symbol, strategy, timeframe) over the symbols that
/// have daily coverage. Duplicate-symbol conflicts are skipped quietly —
/// the partial unique index owns that rule.
async fn bootstrap_runners(
    pool: &PgPool,
    cfg: &SimConfig,
    registry: &StrategyRegistry,
    mkt: &MarketData,
    user_id: i64,
) -> Result<()> {
    let mut symbols = mkt.distinct_daily_symbols(pool).await?;
    info!(count = symbols.len(), "symbols found for runner bootstrap");

    if cfg.engine.symbol_limit > 0 && symbols.len() > cfg.engine.symbol_limit {
        symbols.truncate(cfg.engine.symbol_limit);
        info!(count = symbols.len(), "symbol list capped for bootstrap");
    }

    let mut created = 0u64;
    let mut skipped = 0u64;
    for symbol in &symbols {
        for strategy in registry.bootstrap_keys() {
            for (tf, tf_name) in TIMEFRAMES {
                let name = format!("{symbol}-{strategy}-{tf_name}");
                let res = create_runner(
                    pool,
                    &NewRunner {
                        user_id,
                        name,
                        strategy: strategy.to_string(),
                        stock: symbol.clone(),
                        time_frame: tf,
                        parameters: json!({}),
                        budget: cfg.engine.default_budget,
                    },
                )
                .await;
                match res {
                    Ok(Some(_)) => created += 1,
                    Ok(None) => skipped += 1,
                    Err(e) => {
                        skipped += 1;
                        warn!(symbol = %symbol, strategy, error = %e, "runner bootstrap insert failed");
                    }
                }
            }
        }
    }

    if created > 0 {
        info!(created, skipped, "bootstrapped runners for analytics user");
    } else {
        warn!(skipped, "no runners were created during bootstrap");
    }
    Ok(())
}
