//! Google Calendar client
//!
//! Each user connects a calendar once; we keep their OAuth refresh token and
//! trade it for a short-lived access token on every request.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";

#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Google API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Calendar configuration error: {0}")]
    ConfigError(String),
}

#[derive(Clone)]
pub struct GoogleCalendarClient {
    client: Client,
    client_id: String,
    client_secret: String,
}

/// Event fields we write. The same shape serves create and patch.
#[derive(Debug, Clone)]
pub struct EventDetails<'a> {
    pub summary: &'a str,
    pub description: Option<&'a str>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub timezone: &'a str,
    pub attendee_email: &'a str,
    pub attendee_name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct EventBody<'a> {
    summary: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    start: EventTime<'a>,
    end: EventTime<'a>,
    attendees: Vec<Attendee<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventTime<'a> {
    date_time: String,
    time_zone: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Attendee<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
}

impl<'a> From<&EventDetails<'a>> for EventBody<'a> {
    fn from(details: &EventDetails<'a>) -> Self {
        EventBody {
            summary: details.summary,
            description: details.description,
            start: EventTime {
                date_time: details.start.to_rfc3339(),
                time_zone: details.timezone,
            },
            end: EventTime {
                date_time: details.end.to_rfc3339(),
                time_zone: details.timezone,
            },
            attendees: vec![Attendee {
                email: details.attendee_email,
                display_name: details.attendee_name,
            }],
        }
    }
}

impl GoogleCalendarClient {
    /// Requires GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET.
    pub fn from_env() -> Result<Self, CalendarError> {
        let client_id = std::env::var("GOOGLE_CLIENT_ID")
            .map_err(|_| CalendarError::ConfigError("GOOGLE_CLIENT_ID not set".to_string()))?;
        let client_secret = std::env::var("GOOGLE_CLIENT_SECRET")
            .map_err(|_| CalendarError::ConfigError("GOOGLE_CLIENT_SECRET not set".to_string()))?;
        Ok(Self::new(client_id, client_secret))
    }

    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client: Client::new(),
            client_id,
            client_secret,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, CalendarError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CalendarError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    pub async fn access_token(&self, refresh_token: &str) -> Result<String, CalendarError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];
        let response = self.client.post(TOKEN_URL).form(&params).send().await?;
        let token: TokenResponse = Self::check(response).await?.json().await?;
        Ok(token.access_token)
    }

    pub async fn create_event(
        &self,
        refresh_token: &str,
        calendar_id: &str,
        details: &EventDetails<'_>,
    ) -> Result<CalendarEvent, CalendarError> {
        let token = self.access_token(refresh_token).await?;
        let response = self
            .client
            .post(events_url(calendar_id, None))
            .query(&[("sendUpdates", "all")])
            .bearer_auth(token)
            .json(&EventBody::from(details))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn update_event(
        &self,
        refresh_token: &str,
        calendar_id: &str,
        event_id: &str,
        details: &EventDetails<'_>,
    ) -> Result<CalendarEvent, CalendarError> {
        let token = self.access_token(refresh_token).await?;
        let response = self
            .client
            .patch(events_url(calendar_id, Some(event_id)))
            .query(&[("sendUpdates", "all")])
            .bearer_auth(token)
            .json(&EventBody::from(details))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn cancel_event(&self, refresh_token: &str, calendar_id: &str, event_id: &str) -> Result<(), CalendarError> {
        let token = self.access_token(refresh_token).await?;
        let response = self
            .client
            .delete(events_url(calendar_id, Some(event_id)))
            .query(&[("sendUpdates", "all")])
            .bearer_auth(token)
            .send()
            .await?;

        // Already gone counts as cancelled.
        if response.status() == reqwest::StatusCode::GONE || response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }
}

fn events_url(calendar_id: &str, event_id: Option<&str>) -> String {
    let base = format!("{}/calendars/{}/events", CALENDAR_API, encode_segment(calendar_id));
    match event_id {
        Some(id) => format!("{}/{}", base, encode_segment(id)),
        None => base,
    }
}

/// Percent-encode a path segment. Calendar ids are usually email addresses.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_events_url_encodes_calendar_id() {
        assert_eq!(
            events_url("team@example.com", None),
            "https://www.googleapis.com/calendar/v3/calendars/team%40example.com/events"
        );
        assert_eq!(
            events_url("primary", Some("abc123")),
            "https://www.googleapis.com/calendar/v3/calendars/primary/events/abc123"
        );
    }

    #[test]
    fn test_event_body_shape() {
        let start = Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap();
        let details = EventDetails {
            summary: "Product demo",
            description: None,
            start,
            end: start + chrono::Duration::minutes(30),
            timezone: "Asia/Kolkata",
            attendee_email: "asha@example.com",
            attendee_name: Some("Asha"),
        };
        let json = serde_json::to_value(EventBody::from(&details)).unwrap();
        assert_eq!(json["start"]["dateTime"], "2025-03-04T10:00:00+00:00");
        assert_eq!(json["end"]["timeZone"], "Asia/Kolkata");
        assert_eq!(json["attendees"][0]["displayName"], "Asha");
        assert!(json.get("description").is_none());
    }
}
