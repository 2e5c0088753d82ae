//! Transcript database operations

use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use crate::models::{NewTranscript, Transcript};

pub async fn get_by_call(pool: &PgPool, call_id: i64) -> Result<Option<Transcript>, sqlx::Error> {
    sqlx::query_as::<_, Transcript>(
        r#"
        SELECT id, call_id, user_id, content, segments, created_at
        FROM transcripts
        WHERE call_id = $1
        "#
    )
    .bind(call_id)
    .fetch_optional(pool)
    .await
}

pub async fn get_for_user(pool: &PgPool, user_id: i64, call_id: i64) -> Result<Option<Transcript>, sqlx::Error> {
    sqlx::query_as::<_, Transcript>(
        r#"
        SELECT id, call_id, user_id, content, segments, created_at
        FROM transcripts
        WHERE call_id = $1 AND user_id = $2
        "#
    )
    .bind(call_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

/// Store the transcript of a call, or return the id of the one already
/// stored. A call never gets two transcripts.
pub async fn insert_once(
    conn: &mut PgConnection,
    call_id: i64,
    user_id: i64,
    transcript: &NewTranscript,
) -> Result<i64, sqlx::Error> {
    let inserted: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO transcripts (call_id, user_id, content, segments)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (call_id) DO NOTHING
        RETURNING id
        "#
    )
    .bind(call_id)
    .bind(user_id)
    .bind(&transcript.content)
    .bind(Json(&transcript.segments))
    .fetch_optional(&mut *conn)
    .await?;

    match inserted {
        Some(id) => Ok(id),
        None => {
            sqlx::query_scalar("SELECT id FROM transcripts WHERE call_id = $1")
                .bind(call_id)
                .fetch_one(&mut *conn)
                .await
        }
    }
}
