//! Meeting and calendar integration operations

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use crate::models::{CalendarIntegration, Meeting, MeetingStatus};

pub async fn list_for_user(pool: &PgPool, user_id: i64) -> Result<Vec<Meeting>, sqlx::Error> {
    sqlx::query_as::<_, Meeting>(
        r#"
        SELECT id, user_id, call_id, contact_id, google_event_id, title,
               attendee_email, start_time, end_time, status
        FROM meetings
        WHERE user_id = $1
        ORDER BY start_time DESC
        "#
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn get_for_user(pool: &PgPool, user_id: i64, id: i64) -> Result<Option<Meeting>, sqlx::Error> {
    sqlx::query_as::<_, Meeting>(
        r#"
        SELECT id, user_id, call_id, contact_id, google_event_id, title,
               attendee_email, start_time, end_time, status
        FROM meetings
        WHERE id = $1 AND user_id = $2
        "#
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

#[allow(clippy::too_many_arguments)]
pub async fn insert(
    pool: &PgPool,
    user_id: i64,
    call_id: Option<i64>,
    contact_id: Option<i64>,
    google_event_id: &str,
    title: &str,
    attendee_email: &str,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> Result<Meeting, sqlx::Error> {
    sqlx::query_as::<_, Meeting>(
        r#"
        INSERT INTO meetings (user_id, call_id, contact_id, google_event_id, title,
                              attendee_email, start_time, end_time)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, user_id, call_id, contact_id, google_event_id, title,
                  attendee_email, start_time, end_time, status
        "#
    )
    .bind(user_id)
    .bind(call_id)
    .bind(contact_id)
    .bind(google_event_id)
    .bind(title)
    .bind(attendee_email)
    .bind(start_time)
    .bind(end_time)
    .fetch_one(pool)
    .await
}

pub async fn reschedule(
    pool: &PgPool,
    id: i64,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> Result<Meeting, sqlx::Error> {
    sqlx::query_as::<_, Meeting>(
        r#"
        UPDATE meetings
        SET start_time = $2, end_time = $3, status = 'Rescheduled', updated_at = NOW()
        WHERE id = $1
        RETURNING id, user_id, call_id, contact_id, google_event_id, title,
                  attendee_email, start_time, end_time, status
        "#
    )
    .bind(id)
    .bind(start_time)
    .bind(end_time)
    .fetch_one(pool)
    .await
}

pub async fn set_status(pool: &PgPool, id: i64, status: MeetingStatus) -> Result<Meeting, sqlx::Error> {
    sqlx::query_as::<_, Meeting>(
        r#"
        UPDATE meetings
        SET status = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING id, user_id, call_id, contact_id, google_event_id, title,
                  attendee_email, start_time, end_time, status
        "#
    )
    .bind(id)
    .bind(status)
    .fetch_one(pool)
    .await
}

pub async fn get_integration(pool: &PgPool, user_id: i64) -> Result<Option<CalendarIntegration>, sqlx::Error> {
    sqlx::query_as::<_, CalendarIntegration>(
        r#"
        SELECT user_id, refresh_token, calendar_id, timezone
        FROM calendar_integrations
        WHERE user_id = $1
        "#
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
}
