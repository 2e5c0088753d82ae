use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Meeting {
    pub id: i64,
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "callId")]
    pub call_id: Option<i64>,
    #[serde(rename = "contactId")]
    pub contact_id: Option<i64>,
    #[serde(rename = "googleEventId")]
    pub google_event_id: String,
    pub title: String,
    #[serde(rename = "attendeeEmail")]
    pub attendee_email: String,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime")]
    pub end_time: DateTime<Utc>,
    pub status: MeetingStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "meeting_status", rename_all = "PascalCase")]
pub enum MeetingStatus {
    Scheduled,
    Rescheduled,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleMeetingRequest {
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "durationMinutes")]
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CalendarIntegration {
    pub user_id: i64,
    pub refresh_token: String,
    pub calendar_id: String,
    pub timezone: String,
}
