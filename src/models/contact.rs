use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Contact {
    pub id: i64,
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub name: Option<String>,
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
    pub email: Option<String>,
    pub company: Option<String>,
    #[serde(rename = "leadStage")]
    pub lead_stage: String,
    #[serde(rename = "busyAttempts")]
    pub busy_attempts: i32,
    #[serde(rename = "noAnswerAttempts")]
    pub no_answer_attempts: i32,
    #[serde(rename = "lastContactAt")]
    pub last_contact_at: Option<DateTime<Utc>>,
    #[serde(rename = "autoCreated")]
    pub auto_created: bool,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContactRequest {
    pub name: Option<String>,
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
    pub email: Option<String>,
    pub company: Option<String>,
}

/// Contact fields learned from a call, merged into an existing row without
/// overwriting values the user already has.
#[derive(Debug, Clone, Default)]
pub struct ContactUpsert {
    pub user_id: i64,
    pub phone_number: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
}
