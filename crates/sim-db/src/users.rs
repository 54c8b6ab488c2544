use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn row_to_user(row: &sqlx::postgres::PgRow) -> Result<UserRow> {
    Ok(UserRow {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn get_user_by_username(pool: &PgPool, username: &str) -> Result<Option<UserRow>> {
    let row = sqlx::query(
        r#"
        select id, username, email, created_at
        from users
        where username = $1
        "#,
    )
    .bind(username)
    .fetch_optional(pool)
    .await
    .context("get_user_by_username failed")?;

    row.as_ref().map(row_to_user).transpose()
}

/// Insert-or-fetch by username. The insert races safely: on conflict the
/// existing row is re-read.
pub async fn get_or_create_user(pool: &PgPool, username: &str, email: &str) -> Result<UserRow> {
    let row = sqlx::query(
        r#"
        insert into users (username, email)
        values ($1, $2)
        on conflict (username) do nothing
        returning id, username, email, created_at
        "#,
    )
    .bind(username)
    .bind(email)
    .fetch_optional(pool)
    .await
    .context("get_or_create_user insert failed")?;

    if let Some(row) = row {
        return row_to_user(&row);
    }
    get_user_by_username(pool, username)
        .await?
        .context("user vanished after conflict")
}
