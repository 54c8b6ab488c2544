// crates/sim-db/src/lib.rs
use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub const ENV_DB_URL: &str = "SIM_DATABASE_URL";

pub mod accounts;
pub mod executions;
pub mod orders;
pub mod positions;
pub mod results;
pub mod runners;
pub mod sim_state;
pub mod trades;
pub mod users;

pub use accounts::{ensure_account, set_account_cash, set_account_equity, AccountRow};
pub use executions::{
    bulk_upsert_runner_executions, collapse_batch, execution_count, latest_execution_status,
    severity, ExecRecord,
};
pub use orders::{append_order, NewOrder};
pub use positions::{
    arm_trailing_fields, delete_position, get_open_position, insert_position, open_position_count,
    open_positions_for_user, update_highest_price, NewPosition, OpenPositionRow,
};
pub use results::{list_results, upsert_result, AnalyticsResultRow, NewAnalyticsResult};
pub use runners::{
    create_runner, get_runners_by_user, runner_symbols, set_runner_activation, NewRunner, RunnerRow,
};
pub use sim_state::{
    ensure_sim_state, load_sim_state, reset_sim_scope, set_is_running, set_last_ts,
    SimulationStateRow,
};
pub use trades::{
    append_executed_trade, trade_count, trades_for_runner, ExecutedTradeRow, NewExecutedTrade,
};
pub use users::{get_or_create_user, get_user_by_username, UserRow};

/// Connect to Postgres using SIM_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Test helper used by integration tests:
/// - Connect using SIM_DATABASE_URL
/// - Ensure migrations are applied
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='runner_executions'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_schema: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_schema: bool,
}
