use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// One pending or finished dial attempt of a campaign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct QueueItem {
    pub id: i64,
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "campaignId")]
    pub campaign_id: i64,
    #[serde(rename = "contactId")]
    pub contact_id: i64,
    #[serde(rename = "callId")]
    pub call_id: Option<i64>,
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
    pub status: QueueStatus,
    #[serde(rename = "retryCount")]
    pub retry_count: i32,
    #[serde(rename = "scheduledFor")]
    pub scheduled_for: DateTime<Utc>,
    #[serde(rename = "parentQueueId")]
    pub parent_queue_id: Option<i64>,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "queue_status", rename_all = "PascalCase")]
pub enum QueueStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Cancelled)
    }
}
