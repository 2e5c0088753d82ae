use serde::{Deserialize, Serialize};
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::types::Json;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Campaign {
    pub id: i64,
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "agentId")]
    pub agent_id: i64,
    pub name: String,
    pub status: CampaignStatus,
    #[serde(rename = "maxRetries")]
    pub max_retries: i32,
    #[serde(rename = "retryIntervalMinutes")]
    pub retry_interval_minutes: i32,
    /// Per-attempt delays in minutes; entry `n` is the wait before retry `n + 1`.
    #[serde(rename = "customRetrySchedule")]
    pub custom_retry_schedule: Option<Json<Vec<i64>>>,
    #[serde(rename = "firstCallTime")]
    pub first_call_time: Option<NaiveTime>,
    #[serde(rename = "lastCallTime")]
    pub last_call_time: Option<NaiveTime>,
    #[serde(rename = "summaryEmailEnabled")]
    pub summary_email_enabled: bool,
    #[serde(rename = "completedAt")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "campaign_status", rename_all = "PascalCase")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    #[serde(rename = "agentId")]
    pub agent_id: i64,
    #[serde(rename = "maxRetries")]
    pub max_retries: Option<i32>,
    #[serde(rename = "retryIntervalMinutes")]
    pub retry_interval_minutes: Option<i32>,
    #[serde(rename = "customRetrySchedule")]
    pub custom_retry_schedule: Option<Vec<i64>>,
    #[serde(rename = "firstCallTime")]
    pub first_call_time: Option<NaiveTime>,
    #[serde(rename = "lastCallTime")]
    pub last_call_time: Option<NaiveTime>,
    #[serde(rename = "summaryEmailEnabled", default)]
    pub summary_email_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueContactsRequest {
    #[serde(rename = "contactIds")]
    pub contact_ids: Vec<i64>,
    #[serde(rename = "scheduledFor")]
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Outcome counts for a finished campaign.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct CampaignSummary {
    #[serde(rename = "totalContacts")]
    pub total_contacts: i64,
    #[serde(rename = "completedCalls")]
    pub completed_calls: i64,
    #[serde(rename = "failedCalls")]
    pub failed_calls: i64,
    #[serde(rename = "totalRetries")]
    pub total_retries: i64,
}
