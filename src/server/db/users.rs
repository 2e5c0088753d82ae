//! User database operations

use sqlx::{PgExecutor, PgPool};
use crate::models::User;

pub async fn get_by_id(pool: &PgPool, id: i64) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT id, email, name, password_hash, credits, max_concurrent_calls, active_calls
        FROM users
        WHERE id = $1
        "#
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn get_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT id, email, name, password_hash, credits, max_concurrent_calls, active_calls
        FROM users
        WHERE LOWER(email) = LOWER($1)
        "#
    )
    .bind(email)
    .fetch_optional(pool)
    .await
}

pub async fn create(pool: &PgPool, name: &str, email: &str, password_hash: &str) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (name, email, password_hash)
        VALUES ($1, $2, $3)
        RETURNING id, email, name, password_hash, credits, max_concurrent_calls, active_calls
        "#
    )
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .fetch_one(pool)
    .await
}

/// Take one concurrency slot if the user is below their limit.
pub async fn try_acquire_slot<'e, E>(executor: E, id: i64) -> Result<bool, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let acquired: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE users
        SET active_calls = active_calls + 1
        WHERE id = $1 AND active_calls < max_concurrent_calls
        RETURNING id
        "#
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(acquired.is_some())
}

pub async fn release_slot<'e, E>(executor: E, id: i64) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query("UPDATE users SET active_calls = GREATEST(active_calls - 1, 0) WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}
