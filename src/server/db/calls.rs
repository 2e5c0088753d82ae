//! Call database operations

use sqlx::{PgConnection, PgExecutor, PgPool};
use crate::models::{Call, CallUpdate, NewCall, NewTranscript, QueueItem};

use super::{queue, transcripts, users};

pub async fn get_by_id(pool: &PgPool, id: i64) -> Result<Option<Call>, sqlx::Error> {
    sqlx::query_as::<_, Call>(
        r#"
        SELECT id, execution_id, user_id, agent_id, contact_id, campaign_id,
               direction, phone_number, lifecycle_status,
               initiated_at, ringing_at, answered_at, disconnected_at, ended_at,
               duration_seconds, recording_url, transcript_id, hangup_by, hangup_reason,
               credits_used, credits_charged_at, slot_held
        FROM calls
        WHERE id = $1
        "#
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn get_for_user(pool: &PgPool, user_id: i64, id: i64) -> Result<Option<Call>, sqlx::Error> {
    sqlx::query_as::<_, Call>(
        r#"
        SELECT id, execution_id, user_id, agent_id, contact_id, campaign_id,
               direction, phone_number, lifecycle_status,
               initiated_at, ringing_at, answered_at, disconnected_at, ended_at,
               duration_seconds, recording_url, transcript_id, hangup_by, hangup_reason,
               credits_used, credits_charged_at, slot_held
        FROM calls
        WHERE id = $1 AND user_id = $2
        "#
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn get_by_execution_id(pool: &PgPool, execution_id: &str) -> Result<Option<Call>, sqlx::Error> {
    sqlx::query_as::<_, Call>(
        r#"
        SELECT id, execution_id, user_id, agent_id, contact_id, campaign_id,
               direction, phone_number, lifecycle_status,
               initiated_at, ringing_at, answered_at, disconnected_at, ended_at,
               duration_seconds, recording_url, transcript_id, hangup_by, hangup_reason,
               credits_used, credits_charged_at, slot_held
        FROM calls
        WHERE execution_id = $1
        "#
    )
    .bind(execution_id)
    .fetch_optional(pool)
    .await
}

pub async fn list_for_user(pool: &PgPool, user_id: i64, limit: i64) -> Result<Vec<Call>, sqlx::Error> {
    sqlx::query_as::<_, Call>(
        r#"
        SELECT id, execution_id, user_id, agent_id, contact_id, campaign_id,
               direction, phone_number, lifecycle_status,
               initiated_at, ringing_at, answered_at, disconnected_at, ended_at,
               duration_seconds, recording_url, transcript_id, hangup_by, hangup_reason,
               credits_used, credits_charged_at, slot_held
        FROM calls
        WHERE user_id = $1
        ORDER BY initiated_at DESC
        LIMIT $2
        "#
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Insert a call first seen through a webhook. A duplicate execution id
/// surfaces as a unique violation.
pub async fn insert(pool: &PgPool, call: &NewCall) -> Result<Call, sqlx::Error> {
    sqlx::query_as::<_, Call>(
        r#"
        INSERT INTO calls (execution_id, user_id, agent_id, contact_id, campaign_id,
                           direction, phone_number, lifecycle_status, slot_held)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id, execution_id, user_id, agent_id, contact_id, campaign_id,
                  direction, phone_number, lifecycle_status,
                  initiated_at, ringing_at, answered_at, disconnected_at, ended_at,
                  duration_seconds, recording_url, transcript_id, hangup_by, hangup_reason,
                  credits_used, credits_charged_at, slot_held
        "#
    )
    .bind(&call.execution_id)
    .bind(call.user_id)
    .bind(call.agent_id)
    .bind(call.contact_id)
    .bind(call.campaign_id)
    .bind(call.direction)
    .bind(&call.phone_number)
    .bind(call.status)
    .bind(call.slot_held)
    .fetch_one(pool)
    .await
}

/// Insert a call the dialer just placed and link the queue item that dialed
/// it, in one transaction. The provider's first webhook may already have
/// created the row, in which case only the linkage and slot are filled in.
/// A row that already reached a terminal status never takes the slot.
pub async fn insert_dialed(pool: &PgPool, call: &NewCall, queue_item_id: Option<i64>) -> Result<Call, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, Call>(
        r#"
        INSERT INTO calls (execution_id, user_id, agent_id, contact_id, campaign_id,
                           direction, phone_number, lifecycle_status, slot_held)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (execution_id) DO UPDATE
        SET contact_id = COALESCE(calls.contact_id, EXCLUDED.contact_id),
            campaign_id = COALESCE(calls.campaign_id, EXCLUDED.campaign_id),
            slot_held = CASE
                WHEN calls.lifecycle_status IN ('completed', 'busy', 'no-answer', 'failed') THEN calls.slot_held
                ELSE calls.slot_held OR EXCLUDED.slot_held
            END,
            updated_at = NOW()
        RETURNING id, execution_id, user_id, agent_id, contact_id, campaign_id,
                  direction, phone_number, lifecycle_status,
                  initiated_at, ringing_at, answered_at, disconnected_at, ended_at,
                  duration_seconds, recording_url, transcript_id, hangup_by, hangup_reason,
                  credits_used, credits_charged_at, slot_held
        "#
    )
    .bind(&call.execution_id)
    .bind(call.user_id)
    .bind(call.agent_id)
    .bind(call.contact_id)
    .bind(call.campaign_id)
    .bind(call.direction)
    .bind(&call.phone_number)
    .bind(call.status)
    .bind(call.slot_held)
    .fetch_one(&mut *tx)
    .await?;

    if let Some(queue_item_id) = queue_item_id {
        queue::link_call(&mut *tx, queue_item_id, row.id).await?;
    }

    tx.commit().await?;
    Ok(row)
}

/// Apply a stage update. The status moves only forward, each stage
/// timestamp is written once, and absent fields keep their stored value.
pub async fn update_stage<'e, E>(
    executor: E,
    execution_id: &str,
    update: &CallUpdate,
) -> Result<Option<Call>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Call>(
        r#"
        UPDATE calls
        SET lifecycle_status = CASE WHEN lifecycle_status = ANY($2) THEN $3 ELSE lifecycle_status END,
            ringing_at = CASE WHEN $4 = 'ringing' THEN COALESCE(ringing_at, NOW()) ELSE ringing_at END,
            answered_at = CASE WHEN $4 = 'answered' THEN COALESCE(answered_at, NOW()) ELSE answered_at END,
            disconnected_at = CASE WHEN $4 = 'disconnected' THEN COALESCE(disconnected_at, NOW()) ELSE disconnected_at END,
            ended_at = CASE WHEN $4 = 'ended' THEN COALESCE(ended_at, NOW()) ELSE ended_at END,
            duration_seconds = COALESCE($5, duration_seconds),
            recording_url = COALESCE($6, recording_url),
            hangup_by = COALESCE($7, hangup_by),
            hangup_reason = COALESCE($8, hangup_reason),
            transcript_id = COALESCE(transcript_id, $9),
            campaign_id = COALESCE(campaign_id, $10),
            updated_at = NOW()
        WHERE execution_id = $1
        RETURNING id, execution_id, user_id, agent_id, contact_id, campaign_id,
                  direction, phone_number, lifecycle_status,
                  initiated_at, ringing_at, answered_at, disconnected_at, ended_at,
                  duration_seconds, recording_url, transcript_id, hangup_by, hangup_reason,
                  credits_used, credits_charged_at, slot_held
        "#
    )
    .bind(execution_id)
    .bind(update.status.supersedes())
    .bind(update.status)
    .bind(update.stamp())
    .bind(update.duration_seconds)
    .bind(&update.recording_url)
    .bind(&update.hangup_by)
    .bind(&update.hangup_reason)
    .bind(update.transcript_id)
    .bind(update.campaign_id)
    .fetch_optional(executor)
    .await
}

/// Stage update under a row lock, for the two end-of-call webhooks that can
/// race each other. Creates the transcript on first sight, and backfills the
/// campaign from the queue item that dialed the call.
pub async fn update_stage_locked(
    pool: &PgPool,
    execution_id: &str,
    update: &CallUpdate,
    transcript: Option<&NewTranscript>,
) -> Result<Option<(Call, Option<QueueItem>)>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let current = lock_by_execution_id(&mut tx, execution_id).await?;
    let Some(current) = current else {
        tx.rollback().await?;
        return Ok(None);
    };

    let mut update = update.clone();
    if current.transcript_id.is_none() {
        if let Some(transcript) = transcript {
            let id = transcripts::insert_once(&mut tx, current.id, current.user_id, transcript).await?;
            update.transcript_id = Some(id);
        }
    }

    let queue_item = queue::latest_for_call(&mut *tx, current.id).await?;
    if update.campaign_id.is_none() {
        update.campaign_id = queue_item.as_ref().map(|item| item.campaign_id);
    }

    let call = update_stage(&mut *tx, execution_id, &update)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;

    tx.commit().await?;
    Ok(Some((call, queue_item)))
}

async fn lock_by_execution_id(conn: &mut PgConnection, execution_id: &str) -> Result<Option<Call>, sqlx::Error> {
    sqlx::query_as::<_, Call>(
        r#"
        SELECT id, execution_id, user_id, agent_id, contact_id, campaign_id,
               direction, phone_number, lifecycle_status,
               initiated_at, ringing_at, answered_at, disconnected_at, ended_at,
               duration_seconds, recording_url, transcript_id, hangup_by, hangup_reason,
               credits_used, credits_charged_at, slot_held
        FROM calls
        WHERE execution_id = $1
        FOR UPDATE
        "#
    )
    .bind(execution_id)
    .fetch_optional(conn)
    .await
}

pub async fn link_contact(pool: &PgPool, id: i64, contact_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE calls SET contact_id = COALESCE(contact_id, $2), updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(contact_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Mark the post-call chain as started. Only the first caller gets `true`.
pub async fn claim_post_call(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
    let claimed: Option<i64> = sqlx::query_scalar(
        "UPDATE calls SET post_call_started_at = NOW() WHERE id = $1 AND post_call_started_at IS NULL RETURNING id",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(claimed.is_some())
}

/// Take a concurrency slot for a call that does not hold one yet.
/// Returns whether the call holds a slot afterwards.
pub async fn claim_slot(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let row: Option<(i64, bool)> =
        sqlx::query_as("SELECT user_id, slot_held FROM calls WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

    let held = match row {
        None => false,
        Some((_, true)) => true,
        Some((user_id, false)) => {
            let acquired = users::try_acquire_slot(&mut *tx, user_id).await?;
            if acquired {
                sqlx::query("UPDATE calls SET slot_held = TRUE WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            acquired
        }
    };

    tx.commit().await?;
    Ok(held)
}

/// Give back the call's slot. Only the first release of a call counts.
pub async fn release_slot(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let user_id: Option<i64> = sqlx::query_scalar(
        "UPDATE calls SET slot_held = FALSE WHERE id = $1 AND slot_held RETURNING user_id",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(user_id) = user_id {
        users::release_slot(&mut *tx, user_id).await?;
    }

    tx.commit().await?;
    Ok(user_id.is_some())
}
