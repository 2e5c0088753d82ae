use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use sqlx::types::Json;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transcript {
    pub id: i64,
    #[serde(rename = "callId")]
    pub call_id: i64,
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub content: String,
    pub segments: Json<Vec<TranscriptSegment>>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

/// One speaker turn of a call transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptSegment {
    pub speaker: Speaker,
    pub text: String,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Agent,
    User,
}

/// Transcript ready to be persisted for a call.
#[derive(Debug, Clone)]
pub struct NewTranscript {
    pub content: String,
    pub segments: Vec<TranscriptSegment>,
}
