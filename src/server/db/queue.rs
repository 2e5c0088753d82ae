//! Campaign call queue operations

use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};
use crate::models::{Contact, QueueItem};

/// Most recent queue item that dialed the call, in any state.
pub async fn latest_for_call<'e, E>(executor: E, call_id: i64) -> Result<Option<QueueItem>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, QueueItem>(
        r#"
        SELECT id, user_id, campaign_id, contact_id, call_id, phone_number,
               status, retry_count, scheduled_for, parent_queue_id, last_error
        FROM call_queue
        WHERE call_id = $1
        ORDER BY id DESC
        LIMIT 1
        "#
    )
    .bind(call_id)
    .fetch_optional(executor)
    .await
}

pub async fn processing_for_call(pool: &PgPool, call_id: i64) -> Result<Option<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        r#"
        SELECT id, user_id, campaign_id, contact_id, call_id, phone_number,
               status, retry_count, scheduled_for, parent_queue_id, last_error
        FROM call_queue
        WHERE call_id = $1 AND status = 'Processing'
        ORDER BY id DESC
        LIMIT 1
        "#
    )
    .bind(call_id)
    .fetch_optional(pool)
    .await
}

pub async fn enqueue<'e, E>(
    executor: E,
    user_id: i64,
    campaign_id: i64,
    contact_id: i64,
    phone_number: &str,
    scheduled_for: DateTime<Utc>,
) -> Result<QueueItem, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, QueueItem>(
        r#"
        INSERT INTO call_queue (user_id, campaign_id, contact_id, phone_number, scheduled_for)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, user_id, campaign_id, contact_id, call_id, phone_number,
                  status, retry_count, scheduled_for, parent_queue_id, last_error
        "#
    )
    .bind(user_id)
    .bind(campaign_id)
    .bind(contact_id)
    .bind(phone_number)
    .bind(scheduled_for)
    .fetch_one(executor)
    .await
}

/// Queue every contact for one campaign, all or nothing.
pub async fn enqueue_contacts(
    pool: &PgPool,
    user_id: i64,
    campaign_id: i64,
    contacts: &[Contact],
    scheduled_for: DateTime<Utc>,
) -> Result<Vec<QueueItem>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut queued = Vec::with_capacity(contacts.len());
    for contact in contacts {
        let item = enqueue(&mut *tx, user_id, campaign_id, contact.id, &contact.phone_number, scheduled_for).await?;
        queued.push(item);
    }
    tx.commit().await?;
    Ok(queued)
}

/// Move due items of active campaigns to `Processing`. Rows locked by a
/// concurrent claimer are skipped, so an item is handed out once.
pub async fn claim_due(pool: &PgPool, limit: i64) -> Result<Vec<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        r#"
        UPDATE call_queue
        SET status = 'Processing', updated_at = NOW()
        WHERE id IN (
            SELECT q.id
            FROM call_queue q
            JOIN call_campaigns c ON c.id = q.campaign_id
            WHERE q.status = 'Queued'
              AND q.scheduled_for <= NOW()
              AND c.status = 'Active'
            ORDER BY q.scheduled_for, q.id
            LIMIT $1
            FOR UPDATE OF q SKIP LOCKED
        )
        RETURNING id, user_id, campaign_id, contact_id, call_id, phone_number,
                  status, retry_count, scheduled_for, parent_queue_id, last_error
        "#
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// When the next queued item of an active campaign falls due.
pub async fn next_due_at(pool: &PgPool) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT MIN(q.scheduled_for)
        FROM call_queue q
        JOIN call_campaigns c ON c.id = q.campaign_id
        WHERE q.status = 'Queued' AND c.status = 'Active'
        "#
    )
    .fetch_one(pool)
    .await
}

/// Hand a claimed item back to the queue, optionally for a later time.
pub async fn release(pool: &PgPool, id: i64, scheduled_for: Option<DateTime<Utc>>) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE call_queue
        SET status = 'Queued', scheduled_for = COALESCE($2, scheduled_for), updated_at = NOW()
        WHERE id = $1 AND status = 'Processing'
        "#
    )
    .bind(id)
    .bind(scheduled_for)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn link_call<'e, E>(executor: E, id: i64, call_id: i64) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query("UPDATE call_queue SET call_id = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(call_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Requeue items claimed more than `minutes` ago that never got a call
/// recorded against them. Returns how many were handed back.
pub async fn release_stale(pool: &PgPool, minutes: i32) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE call_queue
        SET status = 'Queued', updated_at = NOW()
        WHERE status = 'Processing'
          AND call_id IS NULL
          AND updated_at < NOW() - make_interval(mins => $1::int)
        "#
    )
    .bind(minutes)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Fail an item that has not finished yet. Returns whether it changed.
pub async fn fail(pool: &PgPool, id: i64, error: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE call_queue
        SET status = 'Failed', last_error = $2, updated_at = NOW()
        WHERE id = $1 AND status IN ('Queued', 'Processing')
        "#
    )
    .bind(id)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn complete_for_call(pool: &PgPool, call_id: i64) -> Result<Option<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        r#"
        UPDATE call_queue
        SET status = 'Completed', updated_at = NOW()
        WHERE call_id = $1 AND status = 'Processing'
        RETURNING id, user_id, campaign_id, contact_id, call_id, phone_number,
                  status, retry_count, scheduled_for, parent_queue_id, last_error
        "#
    )
    .bind(call_id)
    .fetch_optional(pool)
    .await
}

/// Close an item and queue its successor attempt in one transaction.
/// Returns the successor's id, or `None` if the item was already closed.
pub async fn requeue_successor(
    pool: &PgPool,
    id: i64,
    retry_count: i32,
    scheduled_for: DateTime<Utc>,
) -> Result<Option<i64>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let closed: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE call_queue
        SET status = 'Completed', updated_at = NOW()
        WHERE id = $1 AND status IN ('Queued', 'Processing')
        RETURNING id
        "#
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;

    if closed.is_none() {
        tx.rollback().await?;
        return Ok(None);
    }

    let successor: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO call_queue (user_id, campaign_id, contact_id, phone_number,
                                retry_count, scheduled_for, parent_queue_id)
        SELECT user_id, campaign_id, contact_id, phone_number, $2, $3, id
        FROM call_queue
        WHERE id = $1
        RETURNING id
        "#
    )
    .bind(id)
    .bind(retry_count)
    .bind(scheduled_for)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(successor))
}
