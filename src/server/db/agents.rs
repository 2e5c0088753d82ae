//! Agent database operations

use sqlx::PgPool;
use crate::models::{Agent, CreateAgentRequest};

pub async fn list_for_user(pool: &PgPool, user_id: i64) -> Result<Vec<Agent>, sqlx::Error> {
    sqlx::query_as::<_, Agent>(
        r#"
        SELECT id, user_id, bolna_agent_id, name, extraction_prompt_id,
               auto_schedule_meetings, followup_email_enabled,
               followup_subject_template, followup_body_template, created_at
        FROM agents
        WHERE user_id = $1
        ORDER BY name
        "#
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn get_for_user(pool: &PgPool, user_id: i64, id: i64) -> Result<Option<Agent>, sqlx::Error> {
    sqlx::query_as::<_, Agent>(
        r#"
        SELECT id, user_id, bolna_agent_id, name, extraction_prompt_id,
               auto_schedule_meetings, followup_email_enabled,
               followup_subject_template, followup_body_template, created_at
        FROM agents
        WHERE id = $1 AND user_id = $2
        "#
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn get_by_id(pool: &PgPool, id: i64) -> Result<Option<Agent>, sqlx::Error> {
    sqlx::query_as::<_, Agent>(
        r#"
        SELECT id, user_id, bolna_agent_id, name, extraction_prompt_id,
               auto_schedule_meetings, followup_email_enabled,
               followup_subject_template, followup_body_template, created_at
        FROM agents
        WHERE id = $1
        "#
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Look up the agent a webhook refers to by the provider's agent id.
pub async fn get_by_bolna_id(pool: &PgPool, bolna_agent_id: &str) -> Result<Option<Agent>, sqlx::Error> {
    sqlx::query_as::<_, Agent>(
        r#"
        SELECT id, user_id, bolna_agent_id, name, extraction_prompt_id,
               auto_schedule_meetings, followup_email_enabled,
               followup_subject_template, followup_body_template, created_at
        FROM agents
        WHERE bolna_agent_id = $1
        "#
    )
    .bind(bolna_agent_id)
    .fetch_optional(pool)
    .await
}

pub async fn create(pool: &PgPool, user_id: i64, name: &str, req: &CreateAgentRequest) -> Result<Agent, sqlx::Error> {
    sqlx::query_as::<_, Agent>(
        r#"
        INSERT INTO agents (user_id, bolna_agent_id, name, extraction_prompt_id,
                            auto_schedule_meetings, followup_email_enabled,
                            followup_subject_template, followup_body_template)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, user_id, bolna_agent_id, name, extraction_prompt_id,
                  auto_schedule_meetings, followup_email_enabled,
                  followup_subject_template, followup_body_template, created_at
        "#
    )
    .bind(user_id)
    .bind(&req.bolna_agent_id)
    .bind(name)
    .bind(&req.extraction_prompt_id)
    .bind(req.auto_schedule_meetings)
    .bind(req.followup_email_enabled)
    .bind(&req.followup_subject_template)
    .bind(&req.followup_body_template)
    .fetch_one(pool)
    .await
}
