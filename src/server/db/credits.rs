//! Credit ledger operations

use sqlx::PgPool;

/// Charge a call once: stamp the call, deduct the user's balance and write
/// the ledger row in one transaction. Returns `false` if the call was
/// already charged.
pub async fn charge_call(pool: &PgPool, call_id: i64, user_id: i64, credits: i32) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let stamped: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE calls
        SET credits_used = $2, credits_charged_at = NOW(), updated_at = NOW()
        WHERE id = $1 AND credits_charged_at IS NULL
        RETURNING id
        "#
    )
    .bind(call_id)
    .bind(credits)
    .fetch_optional(&mut *tx)
    .await?;

    if stamped.is_none() {
        tx.rollback().await?;
        return Ok(false);
    }

    let balance: i32 = sqlx::query_scalar(
        "UPDATE users SET credits = credits - $2, updated_at = NOW() WHERE id = $1 RETURNING credits",
    )
    .bind(user_id)
    .bind(credits)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO credit_transactions (user_id, call_id, amount, balance_after, description)
        VALUES ($1, $2, $3, $4, $5)
        "#
    )
    .bind(user_id)
    .bind(call_id)
    .bind(-credits)
    .bind(balance)
    .bind(format!("Call usage: {} min", credits))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}
