use anyhow::{Context, Result};
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct AccountRow {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub cash: f64,
    pub equity: f64,
}

fn row_to_account(row: &sqlx::postgres::PgRow) -> Result<AccountRow> {
    Ok(AccountRow {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        cash: row.try_get("cash")?,
        equity: row.try_get("equity")?,
    })
}

/// Fetch-or-create the named account. A pre-existing row with both fields at
/// zero is backfilled to `starting_cash` (legacy rows were seeded empty).
pub async fn ensure_account(
    pool: &PgPool,
    user_id: i64,
    name: &str,
    starting_cash: f64,
) -> Result<AccountRow> {
    sqlx::query(
        r#"
        insert into accounts (user_id, name, cash, equity)
        values ($1, $2, $3, $3)
        on conflict (user_id, name) do nothing
        "#,
    )
    .bind(user_id)
    .bind(name)
    .bind(starting_cash)
    .execute(pool)
    .await
    .context("ensure_account insert failed")?;

    sqlx::query(
        r#"
        update accounts
        set cash = $3, equity = $3
        where user_id = $1 and name = $2 and cash = 0 and equity = 0
        "#,
    )
    .bind(user_id)
    .bind(name)
    .bind(starting_cash)
    .execute(pool)
    .await
    .context("ensure_account backfill failed")?;

    let row = sqlx::query(
        "select id, user_id, name, cash, equity from accounts where user_id = $1 and name = $2",
    )
    .bind(user_id)
    .bind(name)
    .fetch_one(pool)
    .await
    .context("ensure_account fetch failed")?;
    row_to_account(&row)
}

pub async fn set_account_cash(pool: &PgPool, user_id: i64, name: &str, cash: f64) -> Result<()> {
    sqlx::query("update accounts set cash = $3 where user_id = $1 and name = $2")
        .bind(user_id)
        .bind(name)
        .bind(cash)
        .execute(pool)
        .await
        .context("set_account_cash failed")?;
    Ok(())
}

/// Mark-to-market snapshot: equity = cash + open-position market value.
pub async fn set_account_equity(
    pool: &PgPool,
    user_id: i64,
    name: &str,
    equity: f64,
) -> Result<()> {
    sqlx::query("update accounts set equity = $3 where user_id = $1 and name = $2")
        .bind(user_id)
        .bind(name)
        .bind(equity)
        .execute(pool)
        .await
        .context("set_account_equity failed")?;
    Ok(())
}

