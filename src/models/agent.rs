use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// A voice agent configured at the provider and owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Agent {
    pub id: i64,
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "bolnaAgentId")]
    pub bolna_agent_id: String,
    pub name: String,
    #[serde(rename = "extractionPromptId")]
    pub extraction_prompt_id: Option<String>,
    #[serde(rename = "autoScheduleMeetings")]
    pub auto_schedule_meetings: bool,
    #[serde(rename = "followupEmailEnabled")]
    pub followup_email_enabled: bool,
    #[serde(rename = "followupSubjectTemplate")]
    pub followup_subject_template: Option<String>,
    #[serde(rename = "followupBodyTemplate")]
    pub followup_body_template: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAgentRequest {
    #[serde(rename = "bolnaAgentId")]
    pub bolna_agent_id: String,
    pub name: Option<String>,
    #[serde(rename = "extractionPromptId")]
    pub extraction_prompt_id: Option<String>,
    #[serde(rename = "autoScheduleMeetings", default)]
    pub auto_schedule_meetings: bool,
    #[serde(rename = "followupEmailEnabled", default)]
    pub followup_email_enabled: bool,
    #[serde(rename = "followupSubjectTemplate")]
    pub followup_subject_template: Option<String>,
    #[serde(rename = "followupBodyTemplate")]
    pub followup_body_template: Option<String>,
}
