//! Lead analytics database operations

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use crate::models::{LeadAnalytics, LeadExtraction};

pub async fn list_for_user(pool: &PgPool, user_id: i64, limit: i64) -> Result<Vec<LeadAnalytics>, sqlx::Error> {
    sqlx::query_as::<_, LeadAnalytics>(
        r#"
        SELECT id, call_id, user_id, contact_id,
               intent_level, intent_score, urgency_level, urgency_score,
               budget_constraint, budget_score, fit_alignment, fit_score,
               engagement_health, engagement_score, total_score, lead_status_tag,
               extracted_name, extracted_email, company_name, demo_book_datetime,
               cta_pricing_clicked, cta_demo_clicked, cta_followup_clicked, cta_escalated_to_human,
               created_at
        FROM lead_analytics
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Store the extraction for a call. Returns `None` if the call already has one.
pub async fn insert(
    pool: &PgPool,
    call_id: i64,
    user_id: i64,
    contact_id: Option<i64>,
    extraction: &LeadExtraction,
    demo_time: Option<DateTime<Utc>>,
) -> Result<Option<LeadAnalytics>, sqlx::Error> {
    sqlx::query_as::<_, LeadAnalytics>(
        r#"
        INSERT INTO lead_analytics (call_id, user_id, contact_id,
                                    intent_level, intent_score, urgency_level, urgency_score,
                                    budget_constraint, budget_score, fit_alignment, fit_score,
                                    engagement_health, engagement_score, total_score, lead_status_tag,
                                    reasoning, extracted_name, extracted_email, company_name,
                                    demo_book_datetime, cta_pricing_clicked, cta_demo_clicked,
                                    cta_followup_clicked, cta_escalated_to_human)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20, $21, $22, $23, $24)
        ON CONFLICT (call_id) DO NOTHING
        RETURNING id, call_id, user_id, contact_id,
                  intent_level, intent_score, urgency_level, urgency_score,
                  budget_constraint, budget_score, fit_alignment, fit_score,
                  engagement_health, engagement_score, total_score, lead_status_tag,
                  extracted_name, extracted_email, company_name, demo_book_datetime,
                  cta_pricing_clicked, cta_demo_clicked, cta_followup_clicked, cta_escalated_to_human,
                  created_at
        "#
    )
    .bind(call_id)
    .bind(user_id)
    .bind(contact_id)
    .bind(&extraction.intent_level)
    .bind(extraction.intent_score)
    .bind(&extraction.urgency_level)
    .bind(extraction.urgency_score)
    .bind(&extraction.budget_constraint)
    .bind(extraction.budget_score)
    .bind(&extraction.fit_alignment)
    .bind(extraction.fit_score)
    .bind(&extraction.engagement_health)
    .bind(extraction.engagement_score)
    .bind(extraction.total_score)
    .bind(&extraction.lead_status_tag)
    .bind(extraction.reasoning.as_ref().map(Json))
    .bind(&extraction.extraction.name)
    .bind(extraction.email())
    .bind(&extraction.extraction.company_name)
    .bind(demo_time)
    .bind(extraction.cta_pricing_clicked)
    .bind(extraction.cta_demo_clicked)
    .bind(extraction.cta_followup_clicked)
    .bind(extraction.cta_escalated_to_human)
    .fetch_optional(pool)
    .await
}
