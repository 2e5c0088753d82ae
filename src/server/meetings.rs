//! Meeting booking on top of the user's connected Google Calendar

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use thiserror::Error;

use crate::models::{CalendarIntegration, Call, Meeting, MeetingStatus};
use super::calendar::{CalendarError, EventDetails, GoogleCalendarClient};
use super::db;

pub const DEFAULT_MEETING_MINUTES: i64 = 30;

#[derive(Error, Debug)]
pub enum MeetingError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Calendar error: {0}")]
    Calendar(#[from] CalendarError),
    #[error("User {0} has not connected a calendar")]
    NoIntegration(i64),
    #[error("Meeting not found: {0}")]
    NotFound(i64),
    #[error("Meeting {0} is cancelled")]
    Cancelled(i64),
}

pub struct MeetingService {
    db: PgPool,
    calendar: GoogleCalendarClient,
}

fn meeting_title(attendee_name: Option<&str>) -> String {
    match attendee_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("Demo with {}", name),
        None => "Product demo".to_string(),
    }
}

impl MeetingService {
    pub fn new(db: PgPool, calendar: GoogleCalendarClient) -> Self {
        Self { db, calendar }
    }

    async fn integration(&self, user_id: i64) -> Result<CalendarIntegration, MeetingError> {
        db::meetings::get_integration(&self.db, user_id)
            .await?
            .ok_or(MeetingError::NoIntegration(user_id))
    }

    async fn owned(&self, user_id: i64, meeting_id: i64) -> Result<Meeting, MeetingError> {
        db::meetings::get_for_user(&self.db, user_id, meeting_id)
            .await?
            .ok_or(MeetingError::NotFound(meeting_id))
    }

    /// Book the demo a caller agreed to during `call`.
    pub async fn schedule_for_call(
        &self,
        call: &Call,
        contact_id: Option<i64>,
        attendee_email: &str,
        attendee_name: Option<&str>,
        start: DateTime<Utc>,
    ) -> Result<Meeting, MeetingError> {
        let integration = self.integration(call.user_id).await?;
        let end = start + Duration::minutes(DEFAULT_MEETING_MINUTES);
        let title = meeting_title(attendee_name);
        let description = format!("Booked during call {} with {}", call.execution_id, call.phone_number);

        let details = EventDetails {
            summary: &title,
            description: Some(&description),
            start,
            end,
            timezone: &integration.timezone,
            attendee_email,
            attendee_name,
        };
        let event = self
            .calendar
            .create_event(&integration.refresh_token, &integration.calendar_id, &details)
            .await?;

        let meeting = db::meetings::insert(
            &self.db,
            call.user_id,
            Some(call.id),
            contact_id.or(call.contact_id),
            &event.id,
            &title,
            attendee_email,
            start,
            end,
        )
        .await?;
        Ok(meeting)
    }

    pub async fn reschedule(
        &self,
        user_id: i64,
        meeting_id: i64,
        start: DateTime<Utc>,
        duration_minutes: Option<i64>,
    ) -> Result<Meeting, MeetingError> {
        let meeting = self.owned(user_id, meeting_id).await?;
        if meeting.status == MeetingStatus::Cancelled {
            return Err(MeetingError::Cancelled(meeting_id));
        }
        let integration = self.integration(user_id).await?;

        let minutes = duration_minutes
            .filter(|m| *m > 0)
            .unwrap_or_else(|| (meeting.end_time - meeting.start_time).num_minutes().max(DEFAULT_MEETING_MINUTES));
        let end = start + Duration::minutes(minutes);

        let details = EventDetails {
            summary: &meeting.title,
            description: None,
            start,
            end,
            timezone: &integration.timezone,
            attendee_email: &meeting.attendee_email,
            attendee_name: None,
        };
        self.calendar
            .update_event(&integration.refresh_token, &integration.calendar_id, &meeting.google_event_id, &details)
            .await?;

        Ok(db::meetings::reschedule(&self.db, meeting.id, start, end).await?)
    }

    pub async fn cancel(&self, user_id: i64, meeting_id: i64) -> Result<Meeting, MeetingError> {
        let meeting = self.owned(user_id, meeting_id).await?;
        if meeting.status == MeetingStatus::Cancelled {
            return Ok(meeting);
        }
        let integration = self.integration(user_id).await?;

        self.calendar
            .cancel_event(&integration.refresh_token, &integration.calendar_id, &meeting.google_event_id)
            .await?;

        Ok(db::meetings::set_status(&self.db, meeting.id, MeetingStatus::Cancelled).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meeting_title() {
        assert_eq!(meeting_title(Some("Asha")), "Demo with Asha");
        assert_eq!(meeting_title(Some("  ")), "Product demo");
        assert_eq!(meeting_title(None), "Product demo");
    }
}
