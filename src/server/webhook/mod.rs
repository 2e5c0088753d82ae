//! Call lifecycle state machine driven by provider webhooks
//!
//! Each webhook carries the provider's execution id and one of the
//! statuses below. Calls advance through
//!
//! ```text
//! initiated -> ringing -> in-progress -> call-disconnected -> completed
//! ```
//!
//! with `busy`, `no-answer` and `failed` as terminal outcomes reachable
//! from any stage. Webhooks may arrive late, twice, or out of order, so
//! every handler is an idempotent upsert keyed by the execution id and the
//! stored status never moves backwards.

pub mod billing;
pub mod hooks;
pub mod payload;
pub mod retry;
pub mod store;
pub mod transcript;

#[cfg(test)]
pub(crate) mod memory_store;
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use thiserror::Error;

use crate::models::{Call, CallDirection, CallLifecycleStatus, CallUpdate, NewCall, Transcript};
use crate::server::phone::normalize_phone;
use crate::server::AppState;

use self::hooks::LifecycleHooks;
use self::payload::{parse_webhook_body, PayloadError, WebhookPayload};
use self::retry::{RetryOutcome, RetryPolicy};
use self::store::{CallStore, InsertOutcome, StoreError};

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Webhook has no execution id")]
    MissingExecutionId,

    #[error("No agent registered for provider agent {0:?}")]
    AgentNotFound(Option<String>),

    #[error("No customer phone number in webhook for call {0}")]
    MissingPhoneNumber(String),

    #[error("Call {0} not found")]
    CallNotFound(String),

    #[error("Invalid webhook body: {0}")]
    Payload(#[from] PayloadError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl WebhookError {
    /// Bad input the provider cannot fix by retrying.
    pub fn is_client_error(&self) -> bool {
        matches!(self, WebhookError::Payload(_) | WebhookError::MissingExecutionId)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Processed {
        execution_id: String,
        status: CallLifecycleStatus,
    },
    /// Status the state machine does not know; nothing was done.
    Ignored { status: String },
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    /// Pause before handling `completed`, giving a racing
    /// `call-disconnected` webhook time to land first.
    pub settle_delay: Duration,
    pub default_country_code: String,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(2000),
            default_country_code: "+91".to_string(),
        }
    }
}

pub struct WebhookService {
    store: Arc<dyn CallStore>,
    hooks: Arc<dyn LifecycleHooks>,
    settings: WebhookSettings,
}

impl WebhookService {
    pub fn new(store: Arc<dyn CallStore>, hooks: Arc<dyn LifecycleHooks>, settings: WebhookSettings) -> Self {
        Self { store, hooks, settings }
    }

    pub async fn handle(&self, payload: &WebhookPayload) -> Result<WebhookOutcome, WebhookError> {
        let Some(status) = payload.lifecycle_status() else {
            tracing::warn!("Ignoring webhook with unrecognised status {:?}", payload.status());
            return Ok(WebhookOutcome::Ignored {
                status: payload.status().to_string(),
            });
        };

        let execution_id = payload
            .execution_id()
            .ok_or(WebhookError::MissingExecutionId)?
            .to_string();

        tracing::info!("Webhook {} for call {}", status.as_str(), execution_id);

        match status {
            CallLifecycleStatus::Initiated => self.on_initiated(&execution_id, payload).await?,
            CallLifecycleStatus::Ringing | CallLifecycleStatus::InProgress => {
                self.on_progress(&execution_id, status).await?
            }
            CallLifecycleStatus::CallDisconnected => self.on_disconnected(&execution_id, payload).await?,
            CallLifecycleStatus::Completed => self.on_completed(&execution_id, payload).await?,
            CallLifecycleStatus::Busy | CallLifecycleStatus::NoAnswer | CallLifecycleStatus::Failed => {
                self.on_failure(&execution_id, status, payload).await?
            }
        }

        Ok(WebhookOutcome::Processed { execution_id, status })
    }

    /// Build a call row from what the webhook tells us.
    async fn new_call(
        &self,
        execution_id: &str,
        payload: &WebhookPayload,
        status: CallLifecycleStatus,
    ) -> Result<NewCall, WebhookError> {
        let agent = match payload.agent_id.as_deref() {
            Some(agent_id) => self.store.find_agent(agent_id).await?,
            None => None,
        };
        let agent = agent.ok_or_else(|| WebhookError::AgentNotFound(payload.agent_id.clone()))?;

        let raw_number = payload
            .customer_number()
            .ok_or_else(|| WebhookError::MissingPhoneNumber(execution_id.to_string()))?;
        let phone_number = match normalize_phone(raw_number, &self.settings.default_country_code) {
            Ok(normalized) => normalized,
            Err(e) => {
                tracing::warn!("Keeping unnormalized number {:?} for call {}: {}", raw_number, execution_id, e);
                raw_number.trim().to_string()
            }
        };

        let contact_id = self.store.find_contact_id(agent.user_id, &phone_number).await?;

        Ok(NewCall {
            execution_id: execution_id.to_string(),
            user_id: agent.user_id,
            agent_id: agent.id,
            contact_id,
            campaign_id: None,
            direction: payload.direction(),
            phone_number,
            status,
            slot_held: false,
        })
    }

    async fn on_initiated(&self, execution_id: &str, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let new_call = self.new_call(execution_id, payload, CallLifecycleStatus::Initiated).await?;

        match self.store.insert_call(&new_call).await? {
            InsertOutcome::Created(call) => {
                tracing::info!("Created call {} ({}) for user {}", call.id, execution_id, call.user_id);
                if call.direction == CallDirection::Inbound {
                    self.claim_slot(&call).await;
                }
            }
            InsertOutcome::Duplicate => {
                tracing::debug!("Call {} already exists, updating instead", execution_id);
                self.store
                    .update_call(execution_id, &CallUpdate::status(CallLifecycleStatus::Initiated))
                    .await?;
            }
        }
        Ok(())
    }

    async fn on_progress(&self, execution_id: &str, status: CallLifecycleStatus) -> Result<(), WebhookError> {
        let Some(call) = self.store.update_call(execution_id, &CallUpdate::status(status)).await? else {
            tracing::warn!("Received {} for unknown call {}", status.as_str(), execution_id);
            return Ok(());
        };

        if status == CallLifecycleStatus::InProgress {
            if let Some(contact_id) = call.contact_id {
                if let Err(e) = self.store.advance_lead_stage(contact_id).await {
                    tracing::warn!("Failed to advance lead stage of contact {}: {}", contact_id, e);
                }
            }
        }
        Ok(())
    }

    async fn on_disconnected(&self, execution_id: &str, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let transcript = transcript::build_transcript(payload.transcript.as_deref());
        let update = CallUpdate {
            duration_seconds: payload.duration_seconds(),
            recording_url: payload.recording_url().map(str::to_string),
            hangup_by: payload.hangup_by().map(str::to_string),
            hangup_reason: payload.hangup_reason().map(str::to_string),
            ..CallUpdate::status(CallLifecycleStatus::CallDisconnected)
        };

        let locked = self
            .store
            .update_call_locked(execution_id, &update, transcript.as_ref())
            .await
            .map_err(|e| {
                tracing::error!("Failed to record disconnect of call {}: {}", execution_id, e);
                e
            })?
            .ok_or_else(|| WebhookError::CallNotFound(execution_id.to_string()))?;

        tracing::info!(
            "Call {} disconnected (transcript: {:?}, campaign: {:?})",
            execution_id,
            locked.call.transcript_id,
            locked.call.campaign_id
        );
        Ok(())
    }

    async fn on_completed(&self, execution_id: &str, payload: &WebhookPayload) -> Result<(), WebhookError> {
        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }

        if self.store.find_call(execution_id).await?.is_none() {
            tracing::warn!("Call {} missing at completion, rebuilding it from the webhook", execution_id);
            let new_call = self.new_call(execution_id, payload, CallLifecycleStatus::Initiated).await?;
            self.store.insert_call(&new_call).await?;
        }

        let transcript = transcript::build_transcript(payload.transcript.as_deref());
        let update = CallUpdate {
            duration_seconds: payload.duration_seconds(),
            recording_url: payload.recording_url().map(str::to_string),
            hangup_by: payload.hangup_by().map(str::to_string),
            hangup_reason: payload.hangup_reason().map(str::to_string),
            ..CallUpdate::status(CallLifecycleStatus::Completed)
        };

        let call = self
            .store
            .update_call_locked(execution_id, &update, transcript.as_ref())
            .await?
            .ok_or_else(|| WebhookError::CallNotFound(execution_id.to_string()))?
            .call;

        if call.lifecycle_status != CallLifecycleStatus::Completed {
            tracing::warn!(
                "Call {} already ended as {}, ignoring completion",
                execution_id,
                call.lifecycle_status.as_str()
            );
            return Ok(());
        }

        self.bill(&call, payload).await?;
        self.release_slot(&call).await;
        self.complete_queue_item(&call).await;

        match self.store.transcript_for_call(call.id).await {
            Ok(Some(transcript)) => self.start_post_call(call, transcript).await,
            Ok(None) => tracing::info!("Call {} completed without a transcript", execution_id),
            Err(e) => tracing::error!("Failed to load transcript of call {}: {}", execution_id, e),
        }
        Ok(())
    }

    async fn on_failure(
        &self,
        execution_id: &str,
        status: CallLifecycleStatus,
        payload: &WebhookPayload,
    ) -> Result<(), WebhookError> {
        let Some(before) = self.store.find_call(execution_id).await? else {
            tracing::warn!("Received {} for unknown call {}", status.as_str(), execution_id);
            return Ok(());
        };

        let update = CallUpdate {
            duration_seconds: payload.duration_seconds(),
            hangup_by: payload.hangup_by().map(str::to_string),
            hangup_reason: payload.hangup_reason().map(str::to_string),
            ..CallUpdate::status(status)
        };
        let call = self
            .store
            .update_call(execution_id, &update)
            .await?
            .ok_or_else(|| WebhookError::CallNotFound(execution_id.to_string()))?;

        // A redelivered outcome must not count the attempt twice.
        if !before.lifecycle_status.is_terminal() {
            if let Some(contact_id) = call.contact_id {
                if let Err(e) = self.store.record_contact_outcome(contact_id, status).await {
                    tracing::warn!("Failed to record {} on contact {}: {}", status.as_str(), contact_id, e);
                }
            }
        }

        self.release_slot(&call).await;
        self.settle_campaign_attempt(&call, status, payload.hangup_reason()).await
    }

    /// Settle the queue item behind a call the dialer just recorded. The
    /// provider can report the end of a call before the dialer links it to
    /// its queue item, in which case the webhook found nothing to settle.
    pub async fn settle_dialed_call(&self, call: &Call) -> Result<(), WebhookError> {
        match call.lifecycle_status {
            CallLifecycleStatus::Completed => {
                self.complete_queue_item(call).await;
                Ok(())
            }
            status @ (CallLifecycleStatus::Busy | CallLifecycleStatus::NoAnswer | CallLifecycleStatus::Failed) => {
                tracing::info!("Call {} ended as {} before it was linked", call.execution_id, status.as_str());
                self.settle_campaign_attempt(call, status, call.hangup_reason.as_deref()).await
            }
            _ => Ok(()),
        }
    }

    /// Hand the call to the post-call chain, once per call. Redelivered
    /// completions find the claim taken.
    async fn start_post_call(&self, call: Call, transcript: Transcript) {
        match self.store.claim_post_call(call.id).await {
            Ok(true) => {
                let hooks = Arc::clone(&self.hooks);
                tokio::spawn(async move {
                    hooks.call_completed(call, transcript).await;
                });
            }
            Ok(false) => tracing::debug!("Post-call chain of {} already started", call.execution_id),
            Err(e) => tracing::error!("Failed to claim post-call chain of {}: {}", call.execution_id, e),
        }
    }

    async fn bill(&self, call: &Call, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let duration = payload
            .duration()
            .or_else(|| call.duration_seconds.map(f64::from));
        let credits = billing::credits_for_duration(duration.unwrap_or(0.0));
        if credits == 0 {
            return Ok(());
        }

        if self.store.charge_call(call, credits).await? {
            tracing::info!("Charged {} credits to user {} for call {}", credits, call.user_id, call.execution_id);
        } else {
            tracing::debug!("Call {} was already charged", call.execution_id);
        }
        Ok(())
    }

    async fn claim_slot(&self, call: &Call) {
        match self.store.claim_slot(call.id).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                "User {} is at their concurrent call limit; call {} runs without a slot",
                call.user_id,
                call.execution_id
            ),
            Err(e) => tracing::error!("Failed to claim call slot for {}: {}", call.execution_id, e),
        }
    }

    async fn release_slot(&self, call: &Call) {
        if let Err(e) = self.store.release_slot(call.id).await {
            tracing::error!("Failed to release call slot for {}: {}", call.execution_id, e);
        }
    }

    async fn complete_queue_item(&self, call: &Call) {
        match self.store.complete_queue_item(call.id).await {
            Ok(Some(item)) => self.complete_campaign_if_drained(item.campaign_id).await,
            Ok(None) => {}
            Err(e) => tracing::error!("Failed to complete queue item of call {}: {}", call.execution_id, e),
        }
    }

    /// Retry or fail the campaign queue item behind an unsuccessful call.
    async fn settle_campaign_attempt(
        &self,
        call: &Call,
        status: CallLifecycleStatus,
        hangup_reason: Option<&str>,
    ) -> Result<(), WebhookError> {
        let Some(item) = self.store.active_queue_item(call.id).await? else {
            return Ok(());
        };

        if status == CallLifecycleStatus::Failed {
            let reason = hangup_reason.unwrap_or("Call failed");
            if self.store.fail_queue_item(item.id, reason).await? {
                self.complete_campaign_if_drained(item.campaign_id).await;
            }
            return Ok(());
        }

        let Some(campaign) = self.store.campaign(item.campaign_id).await? else {
            tracing::warn!("Campaign {} of queue item {} no longer exists", item.campaign_id, item.id);
            self.store.fail_queue_item(item.id, "Campaign not found").await?;
            return Ok(());
        };

        let policy = RetryPolicy::from_campaign(&campaign);
        let decision = retry::decide(&policy, item.retry_count, Utc::now());

        match self.store.apply_retry(item.id, &decision).await? {
            RetryOutcome::Requeued { queue_item_id, retry_count, scheduled_for } => {
                tracing::info!(
                    "Call {} was {}; retry {} queued as item {} for {}",
                    call.execution_id,
                    status.as_str(),
                    retry_count,
                    queue_item_id,
                    scheduled_for
                );
                self.hooks.retry_scheduled();
            }
            RetryOutcome::Failed => {
                tracing::info!(
                    "Call {} was {}; no retries left for contact {}",
                    call.execution_id,
                    status.as_str(),
                    item.contact_id
                );
                self.complete_campaign_if_drained(campaign.id).await;
            }
            RetryOutcome::AlreadySettled => {
                tracing::debug!("Queue item {} was already settled", item.id);
            }
        }
        Ok(())
    }

    async fn complete_campaign_if_drained(&self, campaign_id: i64) {
        match self.store.complete_campaign_if_drained(campaign_id).await {
            Ok(Some(campaign)) => {
                let hooks = Arc::clone(&self.hooks);
                tokio::spawn(async move {
                    hooks.campaign_completed(campaign).await;
                });
            }
            Ok(None) => {}
            Err(e) => tracing::error!("Failed to check completion of campaign {}: {}", campaign_id, e),
        }
    }
}

/// `POST /api/webhooks/bolna`
///
/// Answers 400 for bodies that cannot be parsed, and 500 when a fatal step
/// failed so the provider delivers the webhook again.
pub async fn handle_bolna_webhook(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let payload = parse_webhook_body(&body).map_err(|e| {
        tracing::warn!("Rejecting webhook body: {}", e);
        StatusCode::BAD_REQUEST
    })?;

    match state.webhooks.handle(&payload).await {
        Ok(WebhookOutcome::Processed { .. }) => Ok(Json(serde_json::json!({ "status": "ok" }))),
        Ok(WebhookOutcome::Ignored { .. }) => Ok(Json(serde_json::json!({ "status": "ignored" }))),
        Err(e) if e.is_client_error() => {
            tracing::warn!("Rejecting webhook: {}", e);
            Err(StatusCode::BAD_REQUEST)
        }
        Err(e) => {
            tracing::error!("Failed to process webhook: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
