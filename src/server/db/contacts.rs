//! Contact database operations

use sqlx::PgPool;
use crate::models::{CallLifecycleStatus, Contact, ContactUpsert, CreateContactRequest};

pub async fn list_for_user(pool: &PgPool, user_id: i64) -> Result<Vec<Contact>, sqlx::Error> {
    sqlx::query_as::<_, Contact>(
        r#"
        SELECT id, user_id, name, phone_number, email, company, lead_stage,
               busy_attempts, no_answer_attempts, last_contact_at, auto_created, created_at
        FROM contacts
        WHERE user_id = $1
        ORDER BY created_at DESC
        "#
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn get_for_user(pool: &PgPool, user_id: i64, id: i64) -> Result<Option<Contact>, sqlx::Error> {
    sqlx::query_as::<_, Contact>(
        r#"
        SELECT id, user_id, name, phone_number, email, company, lead_stage,
               busy_attempts, no_answer_attempts, last_contact_at, auto_created, created_at
        FROM contacts
        WHERE id = $1 AND user_id = $2
        "#
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn get_many_for_user(pool: &PgPool, user_id: i64, ids: &[i64]) -> Result<Vec<Contact>, sqlx::Error> {
    sqlx::query_as::<_, Contact>(
        r#"
        SELECT id, user_id, name, phone_number, email, company, lead_stage,
               busy_attempts, no_answer_attempts, last_contact_at, auto_created, created_at
        FROM contacts
        WHERE user_id = $1 AND id = ANY($2)
        ORDER BY id
        "#
    )
    .bind(user_id)
    .bind(ids)
    .fetch_all(pool)
    .await
}

pub async fn find_id_by_phone(pool: &PgPool, user_id: i64, phone_number: &str) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM contacts WHERE user_id = $1 AND phone_number = $2")
        .bind(user_id)
        .bind(phone_number)
        .fetch_optional(pool)
        .await
}

/// `phone_number` must already be normalized.
pub async fn create(pool: &PgPool, user_id: i64, phone_number: &str, req: &CreateContactRequest) -> Result<Contact, sqlx::Error> {
    sqlx::query_as::<_, Contact>(
        r#"
        INSERT INTO contacts (user_id, name, phone_number, email, company)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, user_id, name, phone_number, email, company, lead_stage,
                  busy_attempts, no_answer_attempts, last_contact_at, auto_created, created_at
        "#
    )
    .bind(user_id)
    .bind(&req.name)
    .bind(phone_number)
    .bind(&req.email)
    .bind(&req.company)
    .fetch_one(pool)
    .await
}

/// Create the contact for a caller, or fill the gaps of the existing one.
pub async fn upsert_from_call(pool: &PgPool, contact: &ContactUpsert) -> Result<Contact, sqlx::Error> {
    sqlx::query_as::<_, Contact>(
        r#"
        INSERT INTO contacts (user_id, phone_number, name, email, company, auto_created, last_contact_at)
        VALUES ($1, $2, $3, $4, $5, TRUE, NOW())
        ON CONFLICT (user_id, phone_number) DO UPDATE
        SET name = COALESCE(contacts.name, EXCLUDED.name),
            email = COALESCE(contacts.email, EXCLUDED.email),
            company = COALESCE(contacts.company, EXCLUDED.company),
            last_contact_at = NOW(),
            updated_at = NOW()
        RETURNING id, user_id, name, phone_number, email, company, lead_stage,
                  busy_attempts, no_answer_attempts, last_contact_at, auto_created, created_at
        "#
    )
    .bind(contact.user_id)
    .bind(&contact.phone_number)
    .bind(&contact.name)
    .bind(&contact.email)
    .bind(&contact.company)
    .fetch_one(pool)
    .await
}

/// Move a contact out of the `new` stage once a call connects. Later stages
/// are left alone.
pub async fn advance_lead_stage(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE contacts
        SET lead_stage = 'contacted', last_contact_at = NOW(), updated_at = NOW()
        WHERE id = $1 AND lead_stage = 'new'
        "#
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Count an unanswered attempt against the contact.
pub async fn record_outcome(pool: &PgPool, id: i64, outcome: CallLifecycleStatus) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE contacts
        SET busy_attempts = busy_attempts + CASE WHEN $2 = 'busy' THEN 1 ELSE 0 END,
            no_answer_attempts = no_answer_attempts + CASE WHEN $2 = 'no-answer' THEN 1 ELSE 0 END,
            last_contact_at = NOW(),
            updated_at = NOW()
        WHERE id = $1
        "#
    )
    .bind(id)
    .bind(outcome.as_str())
    .execute(pool)
    .await?;
    Ok(())
}
