//! Persistence used by the call lifecycle state machine

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::models::{
    Agent, Call, CallLifecycleStatus, CallUpdate, Campaign, NewCall, NewTranscript, QueueItem,
    Transcript,
};
use crate::server::db;

use super::retry::{RetryDecision, RetryOutcome};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Created(Call),
    /// A concurrent webhook created the row first.
    Duplicate,
}

/// Result of a stage update taken under the call's row lock.
#[derive(Debug, Clone)]
pub struct LockedUpdate {
    pub call: Call,
    /// Queue item that dialed the call, if it came from a campaign.
    pub queue_item: Option<QueueItem>,
}

#[async_trait]
pub trait CallStore: Send + Sync {
    async fn find_agent(&self, bolna_agent_id: &str) -> StoreResult<Option<Agent>>;

    async fn find_call(&self, execution_id: &str) -> StoreResult<Option<Call>>;

    async fn find_contact_id(&self, user_id: i64, phone_number: &str) -> StoreResult<Option<i64>>;

    async fn insert_call(&self, call: &NewCall) -> StoreResult<InsertOutcome>;

    async fn update_call(&self, execution_id: &str, update: &CallUpdate) -> StoreResult<Option<Call>>;

    /// Lock the call, store `transcript` if the call has none yet, apply
    /// `update`, and read the campaign queue linkage, all in one
    /// transaction.
    async fn update_call_locked(
        &self,
        execution_id: &str,
        update: &CallUpdate,
        transcript: Option<&NewTranscript>,
    ) -> StoreResult<Option<LockedUpdate>>;

    async fn transcript_for_call(&self, call_id: i64) -> StoreResult<Option<Transcript>>;

    /// Returns `false` if the call was charged before.
    async fn charge_call(&self, call: &Call, credits: i32) -> StoreResult<bool>;

    /// Returns `true` only for the first caller, so the post-call chain runs
    /// at most once per call.
    async fn claim_post_call(&self, call_id: i64) -> StoreResult<bool>;

    async fn claim_slot(&self, call_id: i64) -> StoreResult<bool>;

    async fn release_slot(&self, call_id: i64) -> StoreResult<bool>;

    async fn advance_lead_stage(&self, contact_id: i64) -> StoreResult<()>;

    async fn record_contact_outcome(&self, contact_id: i64, outcome: CallLifecycleStatus) -> StoreResult<()>;

    async fn active_queue_item(&self, call_id: i64) -> StoreResult<Option<QueueItem>>;

    async fn complete_queue_item(&self, call_id: i64) -> StoreResult<Option<QueueItem>>;

    async fn fail_queue_item(&self, queue_item_id: i64, reason: &str) -> StoreResult<bool>;

    async fn apply_retry(&self, queue_item_id: i64, decision: &RetryDecision) -> StoreResult<RetryOutcome>;

    async fn campaign(&self, campaign_id: i64) -> StoreResult<Option<Campaign>>;

    async fn complete_campaign_if_drained(&self, campaign_id: i64) -> StoreResult<Option<Campaign>>;
}

/// `CallStore` backed by the Postgres pool.
#[derive(Clone)]
pub struct PgCallStore {
    pool: PgPool,
}

impl PgCallStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallStore for PgCallStore {
    async fn find_agent(&self, bolna_agent_id: &str) -> StoreResult<Option<Agent>> {
        Ok(db::agents::get_by_bolna_id(&self.pool, bolna_agent_id).await?)
    }

    async fn find_call(&self, execution_id: &str) -> StoreResult<Option<Call>> {
        Ok(db::calls::get_by_execution_id(&self.pool, execution_id).await?)
    }

    async fn find_contact_id(&self, user_id: i64, phone_number: &str) -> StoreResult<Option<i64>> {
        Ok(db::contacts::find_id_by_phone(&self.pool, user_id, phone_number).await?)
    }

    async fn insert_call(&self, call: &NewCall) -> StoreResult<InsertOutcome> {
        match db::calls::insert(&self.pool, call).await {
            Ok(created) => Ok(InsertOutcome::Created(created)),
            Err(e) if db::is_unique_violation(&e) => Ok(InsertOutcome::Duplicate),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_call(&self, execution_id: &str, update: &CallUpdate) -> StoreResult<Option<Call>> {
        Ok(db::calls::update_stage(&self.pool, execution_id, update).await?)
    }

    async fn update_call_locked(
        &self,
        execution_id: &str,
        update: &CallUpdate,
        transcript: Option<&NewTranscript>,
    ) -> StoreResult<Option<LockedUpdate>> {
        let updated = db::calls::update_stage_locked(&self.pool, execution_id, update, transcript).await?;
        Ok(updated.map(|(call, queue_item)| LockedUpdate { call, queue_item }))
    }

    async fn transcript_for_call(&self, call_id: i64) -> StoreResult<Option<Transcript>> {
        Ok(db::transcripts::get_by_call(&self.pool, call_id).await?)
    }

    async fn charge_call(&self, call: &Call, credits: i32) -> StoreResult<bool> {
        Ok(db::credits::charge_call(&self.pool, call.id, call.user_id, credits).await?)
    }

    async fn claim_post_call(&self, call_id: i64) -> StoreResult<bool> {
        Ok(db::calls::claim_post_call(&self.pool, call_id).await?)
    }

    async fn claim_slot(&self, call_id: i64) -> StoreResult<bool> {
        Ok(db::calls::claim_slot(&self.pool, call_id).await?)
    }

    async fn release_slot(&self, call_id: i64) -> StoreResult<bool> {
        Ok(db::calls::release_slot(&self.pool, call_id).await?)
    }

    async fn advance_lead_stage(&self, contact_id: i64) -> StoreResult<()> {
        Ok(db::contacts::advance_lead_stage(&self.pool, contact_id).await?)
    }

    async fn record_contact_outcome(&self, contact_id: i64, outcome: CallLifecycleStatus) -> StoreResult<()> {
        Ok(db::contacts::record_outcome(&self.pool, contact_id, outcome).await?)
    }

    async fn active_queue_item(&self, call_id: i64) -> StoreResult<Option<QueueItem>> {
        Ok(db::queue::processing_for_call(&self.pool, call_id).await?)
    }

    async fn complete_queue_item(&self, call_id: i64) -> StoreResult<Option<QueueItem>> {
        Ok(db::queue::complete_for_call(&self.pool, call_id).await?)
    }

    async fn fail_queue_item(&self, queue_item_id: i64, reason: &str) -> StoreResult<bool> {
        Ok(db::queue::fail(&self.pool, queue_item_id, reason).await?)
    }

    async fn apply_retry(&self, queue_item_id: i64, decision: &RetryDecision) -> StoreResult<RetryOutcome> {
        match decision {
            RetryDecision::Retry { retry_count, scheduled_for } => {
                let successor =
                    db::queue::requeue_successor(&self.pool, queue_item_id, *retry_count, *scheduled_for).await?;
                Ok(match successor {
                    Some(id) => RetryOutcome::Requeued {
                        queue_item_id: id,
                        retry_count: *retry_count,
                        scheduled_for: *scheduled_for,
                    },
                    None => RetryOutcome::AlreadySettled,
                })
            }
            RetryDecision::Exhausted => {
                let failed = db::queue::fail(&self.pool, queue_item_id, "Retries exhausted").await?;
                Ok(if failed { RetryOutcome::Failed } else { RetryOutcome::AlreadySettled })
            }
        }
    }

    async fn campaign(&self, campaign_id: i64) -> StoreResult<Option<Campaign>> {
        Ok(db::campaigns::get_by_id(&self.pool, campaign_id).await?)
    }

    async fn complete_campaign_if_drained(&self, campaign_id: i64) -> StoreResult<Option<Campaign>> {
        Ok(db::campaigns::complete_if_drained(&self.pool, campaign_id).await?)
    }
}
