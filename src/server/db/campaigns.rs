//! Campaign database operations

use sqlx::types::Json;
use sqlx::PgPool;
use crate::models::{Campaign, CampaignStatus, CampaignSummary, CreateCampaignRequest};

pub async fn list_for_user(pool: &PgPool, user_id: i64) -> Result<Vec<Campaign>, sqlx::Error> {
    sqlx::query_as::<_, Campaign>(
        r#"
        SELECT id, user_id, agent_id, name, status, max_retries, retry_interval_minutes,
               custom_retry_schedule, first_call_time, last_call_time,
               summary_email_enabled, completed_at, created_at
        FROM call_campaigns
        WHERE user_id = $1
        ORDER BY created_at DESC
        "#
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn get_by_id(pool: &PgPool, id: i64) -> Result<Option<Campaign>, sqlx::Error> {
    sqlx::query_as::<_, Campaign>(
        r#"
        SELECT id, user_id, agent_id, name, status, max_retries, retry_interval_minutes,
               custom_retry_schedule, first_call_time, last_call_time,
               summary_email_enabled, completed_at, created_at
        FROM call_campaigns
        WHERE id = $1
        "#
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn get_for_user(pool: &PgPool, user_id: i64, id: i64) -> Result<Option<Campaign>, sqlx::Error> {
    sqlx::query_as::<_, Campaign>(
        r#"
        SELECT id, user_id, agent_id, name, status, max_retries, retry_interval_minutes,
               custom_retry_schedule, first_call_time, last_call_time,
               summary_email_enabled, completed_at, created_at
        FROM call_campaigns
        WHERE id = $1 AND user_id = $2
        "#
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn create(pool: &PgPool, user_id: i64, req: &CreateCampaignRequest) -> Result<Campaign, sqlx::Error> {
    sqlx::query_as::<_, Campaign>(
        r#"
        INSERT INTO call_campaigns (user_id, agent_id, name, max_retries, retry_interval_minutes,
                                    custom_retry_schedule, first_call_time, last_call_time,
                                    summary_email_enabled, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'Draft')
        RETURNING id, user_id, agent_id, name, status, max_retries, retry_interval_minutes,
                  custom_retry_schedule, first_call_time, last_call_time,
                  summary_email_enabled, completed_at, created_at
        "#
    )
    .bind(user_id)
    .bind(req.agent_id)
    .bind(&req.name)
    .bind(req.max_retries.unwrap_or(2))
    .bind(req.retry_interval_minutes.unwrap_or(60))
    .bind(req.custom_retry_schedule.as_ref().map(Json))
    .bind(req.first_call_time)
    .bind(req.last_call_time)
    .bind(req.summary_email_enabled)
    .fetch_one(pool)
    .await
}

pub async fn update_status(pool: &PgPool, id: i64, status: CampaignStatus) -> Result<Campaign, sqlx::Error> {
    sqlx::query_as::<_, Campaign>(
        r#"
        UPDATE call_campaigns
        SET status = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING id, user_id, agent_id, name, status, max_retries, retry_interval_minutes,
                  custom_retry_schedule, first_call_time, last_call_time,
                  summary_email_enabled, completed_at, created_at
        "#
    )
    .bind(id)
    .bind(status)
    .fetch_one(pool)
    .await
}

/// Mark an active campaign completed once nothing of it is queued or in
/// flight. Returns the campaign only for the caller that completed it.
pub async fn complete_if_drained(pool: &PgPool, id: i64) -> Result<Option<Campaign>, sqlx::Error> {
    sqlx::query_as::<_, Campaign>(
        r#"
        UPDATE call_campaigns
        SET status = 'Completed', completed_at = NOW(), updated_at = NOW()
        WHERE id = $1
          AND status = 'Active'
          AND NOT EXISTS (
              SELECT 1 FROM call_queue
              WHERE campaign_id = $1 AND status IN ('Queued', 'Processing')
          )
        RETURNING id, user_id, agent_id, name, status, max_retries, retry_interval_minutes,
                  custom_retry_schedule, first_call_time, last_call_time,
                  summary_email_enabled, completed_at, created_at
        "#
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn summary(pool: &PgPool, id: i64) -> Result<CampaignSummary, sqlx::Error> {
    sqlx::query_as::<_, CampaignSummary>(
        r#"
        SELECT COUNT(DISTINCT contact_id) AS total_contacts,
               COUNT(*) FILTER (WHERE status = 'Completed' AND call_id IS NOT NULL
                                AND NOT EXISTS (SELECT 1 FROM call_queue r WHERE r.parent_queue_id = q.id)) AS completed_calls,
               COUNT(*) FILTER (WHERE status = 'Failed') AS failed_calls,
               COUNT(*) FILTER (WHERE retry_count > 0) AS total_retries
        FROM call_queue q
        WHERE campaign_id = $1
        "#
    )
    .bind(id)
    .fetch_one(pool)
    .await
}
