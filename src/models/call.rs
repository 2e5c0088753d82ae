use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Call {
    pub id: i64,
    #[serde(rename = "executionId")]
    pub execution_id: String,
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "agentId")]
    pub agent_id: i64,
    #[serde(rename = "contactId")]
    pub contact_id: Option<i64>,
    #[serde(rename = "campaignId")]
    pub campaign_id: Option<i64>,
    pub direction: CallDirection,
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
    #[serde(rename = "status")]
    pub lifecycle_status: CallLifecycleStatus,
    #[serde(rename = "initiatedAt")]
    pub initiated_at: DateTime<Utc>,
    #[serde(rename = "ringingAt")]
    pub ringing_at: Option<DateTime<Utc>>,
    #[serde(rename = "answeredAt")]
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(rename = "disconnectedAt")]
    pub disconnected_at: Option<DateTime<Utc>>,
    #[serde(rename = "endedAt")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(rename = "durationSeconds")]
    pub duration_seconds: Option<i32>,
    #[serde(rename = "recordingUrl")]
    pub recording_url: Option<String>,
    #[serde(rename = "transcriptId")]
    pub transcript_id: Option<i64>,
    #[serde(rename = "hangupBy")]
    pub hangup_by: Option<String>,
    #[serde(rename = "hangupReason")]
    pub hangup_reason: Option<String>,
    #[serde(rename = "creditsUsed")]
    pub credits_used: i32,
    #[serde(rename = "creditsChargedAt")]
    pub credits_charged_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub slot_held: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "call_direction", rename_all = "PascalCase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Where a call is in the provider's lifecycle.
///
/// Stored as the Postgres enum `call_lifecycle_status` using the
/// provider's own status strings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(type_name = "call_lifecycle_status", rename_all = "kebab-case")]
pub enum CallLifecycleStatus {
    Initiated,
    Ringing,
    InProgress,
    CallDisconnected,
    Completed,
    Busy,
    NoAnswer,
    Failed,
}

impl CallLifecycleStatus {
    pub const ALL: [CallLifecycleStatus; 8] = [
        CallLifecycleStatus::Initiated,
        CallLifecycleStatus::Ringing,
        CallLifecycleStatus::InProgress,
        CallLifecycleStatus::CallDisconnected,
        CallLifecycleStatus::Completed,
        CallLifecycleStatus::Busy,
        CallLifecycleStatus::NoAnswer,
        CallLifecycleStatus::Failed,
    ];

    /// Map a webhook `status` string. Unknown strings are not an error.
    pub fn from_webhook(status: &str) -> Option<Self> {
        match status.trim() {
            "initiated" => Some(Self::Initiated),
            "ringing" => Some(Self::Ringing),
            "in-progress" => Some(Self::InProgress),
            "call-disconnected" => Some(Self::CallDisconnected),
            "completed" => Some(Self::Completed),
            "busy" => Some(Self::Busy),
            "no-answer" => Some(Self::NoAnswer),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Ringing => "ringing",
            Self::InProgress => "in-progress",
            Self::CallDisconnected => "call-disconnected",
            Self::Completed => "completed",
            Self::Busy => "busy",
            Self::NoAnswer => "no-answer",
            Self::Failed => "failed",
        }
    }

    /// Position in the forward order. All terminal states share the last rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Initiated => 0,
            Self::Ringing => 1,
            Self::InProgress => 2,
            Self::CallDisconnected => 3,
            Self::Completed | Self::Busy | Self::NoAnswer | Self::Failed => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 4
    }

    /// Re-applying the current status is allowed; moving backwards is not.
    pub fn can_advance_to(&self, next: CallLifecycleStatus) -> bool {
        next == *self || next.rank() > self.rank()
    }

    /// Statuses a row may hold for `self` to overwrite it.
    pub fn supersedes(&self) -> Vec<CallLifecycleStatus> {
        Self::ALL
            .iter()
            .copied()
            .filter(|current| current.can_advance_to(*self))
            .collect()
    }
}

/// A call row to be created.
#[derive(Debug, Clone)]
pub struct NewCall {
    pub execution_id: String,
    pub user_id: i64,
    pub agent_id: i64,
    pub contact_id: Option<i64>,
    pub campaign_id: Option<i64>,
    pub direction: CallDirection,
    pub phone_number: String,
    pub status: CallLifecycleStatus,
    pub slot_held: bool,
}

/// Additive change to a call row. `None` fields leave the column alone, and
/// the status only moves forward.
#[derive(Debug, Clone)]
pub struct CallUpdate {
    pub status: CallLifecycleStatus,
    pub duration_seconds: Option<i32>,
    pub recording_url: Option<String>,
    pub hangup_by: Option<String>,
    pub hangup_reason: Option<String>,
    pub transcript_id: Option<i64>,
    pub campaign_id: Option<i64>,
}

impl CallUpdate {
    pub fn status(status: CallLifecycleStatus) -> Self {
        Self {
            status,
            duration_seconds: None,
            recording_url: None,
            hangup_by: None,
            hangup_reason: None,
            transcript_id: None,
            campaign_id: None,
        }
    }

    /// Timestamp column this status fills on first arrival.
    pub fn stamp(&self) -> &'static str {
        match self.status {
            CallLifecycleStatus::Initiated => "none",
            CallLifecycleStatus::Ringing => "ringing",
            CallLifecycleStatus::InProgress => "answered",
            CallLifecycleStatus::CallDisconnected => "disconnected",
            _ => "ended",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialRequest {
    #[serde(rename = "agentId")]
    pub agent_id: i64,
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
    #[serde(rename = "contactId")]
    pub contact_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialResponse {
    #[serde(rename = "callId")]
    pub call_id: i64,
    #[serde(rename = "executionId")]
    pub execution_id: String,
    pub status: CallLifecycleStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_webhook_known_and_unknown() {
        assert_eq!(CallLifecycleStatus::from_webhook("in-progress"), Some(CallLifecycleStatus::InProgress));
        assert_eq!(CallLifecycleStatus::from_webhook("call-disconnected"), Some(CallLifecycleStatus::CallDisconnected));
        assert_eq!(CallLifecycleStatus::from_webhook("queued"), None);
        assert_eq!(CallLifecycleStatus::from_webhook(""), None);
    }

    #[test]
    fn test_status_strings_match_webhook_names() {
        for status in CallLifecycleStatus::ALL {
            assert_eq!(CallLifecycleStatus::from_webhook(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_forward_only_transitions() {
        use CallLifecycleStatus::*;
        assert!(Initiated.can_advance_to(Ringing));
        assert!(Ringing.can_advance_to(CallDisconnected));
        assert!(CallDisconnected.can_advance_to(Completed));
        assert!(Initiated.can_advance_to(Busy));
        assert!(!Completed.can_advance_to(CallDisconnected));
        assert!(!InProgress.can_advance_to(Ringing));
        assert!(!Busy.can_advance_to(Completed));
        assert!(Completed.can_advance_to(Completed));
    }

    #[test]
    fn test_supersedes_for_terminal_status() {
        let replaced = CallLifecycleStatus::Completed.supersedes();
        assert!(replaced.contains(&CallLifecycleStatus::CallDisconnected));
        assert!(replaced.contains(&CallLifecycleStatus::Completed));
        assert!(!replaced.contains(&CallLifecycleStatus::Busy));
        assert_eq!(CallLifecycleStatus::Initiated.supersedes(), vec![CallLifecycleStatus::Initiated]);
    }
}
