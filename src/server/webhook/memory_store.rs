//! In-memory `CallStore` mirroring the Postgres queries, for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use tokio::sync::mpsc;

use crate::models::{
    Agent, Call, CallLifecycleStatus, CallUpdate, Campaign, CampaignStatus, NewCall, NewTranscript,
    QueueItem, QueueStatus, Transcript,
};

use super::hooks::LifecycleHooks;
use super::retry::{RetryDecision, RetryOutcome};
use super::store::{CallStore, InsertOutcome, LockedUpdate, StoreResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactCounters {
    pub user_id: i64,
    pub phone_number: String,
    pub lead_stage: String,
    pub busy_attempts: i32,
    pub no_answer_attempts: i32,
    pub contacted: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Slots {
    pub active: i32,
    pub max: i32,
}

#[derive(Default)]
struct State {
    agents: Vec<Agent>,
    calls: Vec<Call>,
    transcripts: Vec<Transcript>,
    contacts: HashMap<i64, ContactCounters>,
    queue: Vec<QueueItem>,
    campaigns: Vec<Campaign>,
    charges: Vec<(i64, i32)>,
    post_call_claims: HashSet<i64>,
    slots: HashMap<i64, Slots>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn call_mut(&mut self, execution_id: &str) -> Option<&mut Call> {
        self.calls.iter_mut().find(|c| c.execution_id == execution_id)
    }

    fn apply(&mut self, execution_id: &str, update: &CallUpdate) -> Option<Call> {
        let call = self.call_mut(execution_id)?;
        let now = Utc::now();

        if call.lifecycle_status.can_advance_to(update.status) {
            call.lifecycle_status = update.status;
        }
        match update.stamp() {
            "ringing" => call.ringing_at = call.ringing_at.or(Some(now)),
            "answered" => call.answered_at = call.answered_at.or(Some(now)),
            "disconnected" => call.disconnected_at = call.disconnected_at.or(Some(now)),
            "ended" => call.ended_at = call.ended_at.or(Some(now)),
            _ => {}
        }
        if update.duration_seconds.is_some() {
            call.duration_seconds = update.duration_seconds;
        }
        if update.recording_url.is_some() {
            call.recording_url = update.recording_url.clone();
        }
        if update.hangup_by.is_some() {
            call.hangup_by = update.hangup_by.clone();
        }
        if update.hangup_reason.is_some() {
            call.hangup_reason = update.hangup_reason.clone();
        }
        call.transcript_id = call.transcript_id.or(update.transcript_id);
        call.campaign_id = call.campaign_id.or(update.campaign_id);
        Some(call.clone())
    }
}

#[derive(Default)]
pub struct MemoryCallStore {
    state: Mutex<State>,
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_agent(&self, id: i64, user_id: i64, bolna_agent_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.agents.push(Agent {
            id,
            user_id,
            bolna_agent_id: bolna_agent_id.to_string(),
            name: "Maya".to_string(),
            extraction_prompt_id: Some("pmpt_test".to_string()),
            auto_schedule_meetings: false,
            followup_email_enabled: false,
            followup_subject_template: None,
            followup_body_template: None,
            created_at: None,
        });
        state.slots.entry(user_id).or_insert(Slots { active: 0, max: 2 });
    }

    pub fn add_contact(&self, id: i64, user_id: i64, phone_number: &str) {
        let mut state = self.state.lock().unwrap();
        state.contacts.insert(
            id,
            ContactCounters {
                user_id,
                phone_number: phone_number.to_string(),
                lead_stage: "new".to_string(),
                ..Default::default()
            },
        );
    }

    pub fn add_campaign(&self, id: i64, user_id: i64, max_retries: i32, retry_interval_minutes: i32) {
        let mut state = self.state.lock().unwrap();
        state.campaigns.push(Campaign {
            id,
            user_id,
            agent_id: 1,
            name: format!("Campaign {}", id),
            status: CampaignStatus::Active,
            max_retries,
            retry_interval_minutes,
            custom_retry_schedule: None,
            first_call_time: None,
            last_call_time: None,
            summary_email_enabled: false,
            completed_at: None,
            created_at: None,
        });
    }

    /// A processing queue item linked to an existing call.
    pub fn add_queue_item(&self, campaign_id: i64, contact_id: i64, execution_id: &str, retry_count: i32) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        let call = state
            .calls
            .iter_mut()
            .find(|c| c.execution_id == execution_id)
            .expect("queue item needs an existing call");
        call.slot_held = true;
        let (call_id, user_id, phone_number) = (call.id, call.user_id, call.phone_number.clone());
        state.slots.entry(user_id).or_default().active += 1;
        state.queue.push(QueueItem {
            id,
            user_id,
            campaign_id,
            contact_id,
            call_id: Some(call_id),
            phone_number,
            status: QueueStatus::Processing,
            retry_count,
            scheduled_for: Utc::now(),
            parent_queue_id: None,
            last_error: None,
        });
        id
    }

    pub fn call(&self, execution_id: &str) -> Option<Call> {
        let state = self.state.lock().unwrap();
        state.calls.iter().find(|c| c.execution_id == execution_id).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn queue(&self) -> Vec<QueueItem> {
        self.state.lock().unwrap().queue.clone()
    }

    pub fn charges(&self) -> Vec<(i64, i32)> {
        self.state.lock().unwrap().charges.clone()
    }

    pub fn transcripts(&self) -> Vec<Transcript> {
        self.state.lock().unwrap().transcripts.clone()
    }

    pub fn contact(&self, id: i64) -> Option<ContactCounters> {
        self.state.lock().unwrap().contacts.get(&id).cloned()
    }

    pub fn campaign_status(&self, id: i64) -> Option<CampaignStatus> {
        let state = self.state.lock().unwrap();
        state.campaigns.iter().find(|c| c.id == id).map(|c| c.status)
    }

    pub fn active_calls(&self, user_id: i64) -> i32 {
        let state = self.state.lock().unwrap();
        state.slots.get(&user_id).map(|s| s.active).unwrap_or(0)
    }
}

#[async_trait]
impl CallStore for MemoryCallStore {
    async fn find_agent(&self, bolna_agent_id: &str) -> StoreResult<Option<Agent>> {
        let state = self.state.lock().unwrap();
        Ok(state.agents.iter().find(|a| a.bolna_agent_id == bolna_agent_id).cloned())
    }

    async fn find_call(&self, execution_id: &str) -> StoreResult<Option<Call>> {
        Ok(self.call(execution_id))
    }

    async fn find_contact_id(&self, user_id: i64, phone_number: &str) -> StoreResult<Option<i64>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .contacts
            .iter()
            .find(|(_, c)| c.user_id == user_id && c.phone_number == phone_number)
            .map(|(id, _)| *id))
    }

    async fn insert_call(&self, call: &NewCall) -> StoreResult<InsertOutcome> {
        let mut state = self.state.lock().unwrap();
        if state.calls.iter().any(|c| c.execution_id == call.execution_id) {
            return Ok(InsertOutcome::Duplicate);
        }
        let id = state.next_id();
        let row = Call {
            id,
            execution_id: call.execution_id.clone(),
            user_id: call.user_id,
            agent_id: call.agent_id,
            contact_id: call.contact_id,
            campaign_id: call.campaign_id,
            direction: call.direction,
            phone_number: call.phone_number.clone(),
            lifecycle_status: call.status,
            initiated_at: Utc::now(),
            ringing_at: None,
            answered_at: None,
            disconnected_at: None,
            ended_at: None,
            duration_seconds: None,
            recording_url: None,
            transcript_id: None,
            hangup_by: None,
            hangup_reason: None,
            credits_used: 0,
            credits_charged_at: None,
            slot_held: call.slot_held,
        };
        state.calls.push(row.clone());
        Ok(InsertOutcome::Created(row))
    }

    async fn update_call(&self, execution_id: &str, update: &CallUpdate) -> StoreResult<Option<Call>> {
        Ok(self.state.lock().unwrap().apply(execution_id, update))
    }

    async fn update_call_locked(
        &self,
        execution_id: &str,
        update: &CallUpdate,
        transcript: Option<&NewTranscript>,
    ) -> StoreResult<Option<LockedUpdate>> {
        let mut state = self.state.lock().unwrap();
        let Some(current) = state.calls.iter().find(|c| c.execution_id == execution_id).cloned() else {
            return Ok(None);
        };

        let mut update = update.clone();
        if current.transcript_id.is_none() {
            if let Some(transcript) = transcript {
                let existing = state.transcripts.iter().find(|t| t.call_id == current.id).map(|t| t.id);
                let id = match existing {
                    Some(id) => id,
                    None => {
                        let id = state.next_id();
                        state.transcripts.push(Transcript {
                            id,
                            call_id: current.id,
                            user_id: current.user_id,
                            content: transcript.content.clone(),
                            segments: Json(transcript.segments.clone()),
                            created_at: Some(Utc::now()),
                        });
                        id
                    }
                };
                update.transcript_id = Some(id);
            }
        }

        let queue_item = state
            .queue
            .iter()
            .filter(|q| q.call_id == Some(current.id))
            .max_by_key(|q| q.id)
            .cloned();
        if update.campaign_id.is_none() {
            update.campaign_id = queue_item.as_ref().map(|q| q.campaign_id);
        }

        let call = state.apply(execution_id, &update);
        Ok(call.map(|call| LockedUpdate { call, queue_item }))
    }

    async fn transcript_for_call(&self, call_id: i64) -> StoreResult<Option<Transcript>> {
        let state = self.state.lock().unwrap();
        Ok(state.transcripts.iter().find(|t| t.call_id == call_id).cloned())
    }

    async fn charge_call(&self, call: &Call, credits: i32) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(row) = state.calls.iter_mut().find(|c| c.id == call.id) else {
            return Ok(false);
        };
        if row.credits_charged_at.is_some() {
            return Ok(false);
        }
        row.credits_used = credits;
        row.credits_charged_at = Some(Utc::now());
        state.charges.push((call.id, credits));
        Ok(true)
    }

    async fn claim_post_call(&self, call_id: i64) -> StoreResult<bool> {
        Ok(self.state.lock().unwrap().post_call_claims.insert(call_id))
    }

    async fn claim_slot(&self, call_id: i64) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        let Some((user_id, held)) = state.calls.iter().find(|c| c.id == call_id).map(|c| (c.user_id, c.slot_held)) else {
            return Ok(false);
        };
        if held {
            return Ok(true);
        }
        let slots = state.slots.entry(user_id).or_default();
        if slots.active >= slots.max {
            return Ok(false);
        }
        slots.active += 1;
        if let Some(call) = state.calls.iter_mut().find(|c| c.id == call_id) {
            call.slot_held = true;
        }
        Ok(true)
    }

    async fn release_slot(&self, call_id: i64) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(call) = state.calls.iter_mut().find(|c| c.id == call_id && c.slot_held) else {
            return Ok(false);
        };
        call.slot_held = false;
        let user_id = call.user_id;
        let slots = state.slots.entry(user_id).or_default();
        slots.active = (slots.active - 1).max(0);
        Ok(true)
    }

    async fn advance_lead_stage(&self, contact_id: i64) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(contact) = state.contacts.get_mut(&contact_id) {
            if contact.lead_stage == "new" {
                contact.lead_stage = "contacted".to_string();
            }
            contact.contacted = true;
        }
        Ok(())
    }

    async fn record_contact_outcome(&self, contact_id: i64, outcome: CallLifecycleStatus) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(contact) = state.contacts.get_mut(&contact_id) {
            match outcome {
                CallLifecycleStatus::Busy => contact.busy_attempts += 1,
                CallLifecycleStatus::NoAnswer => contact.no_answer_attempts += 1,
                _ => {}
            }
            contact.contacted = true;
        }
        Ok(())
    }

    async fn active_queue_item(&self, call_id: i64) -> StoreResult<Option<QueueItem>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .queue
            .iter()
            .filter(|q| q.call_id == Some(call_id) && q.status == QueueStatus::Processing)
            .max_by_key(|q| q.id)
            .cloned())
    }

    async fn complete_queue_item(&self, call_id: i64) -> StoreResult<Option<QueueItem>> {
        let mut state = self.state.lock().unwrap();
        let item = state
            .queue
            .iter_mut()
            .find(|q| q.call_id == Some(call_id) && q.status == QueueStatus::Processing);
        Ok(item.map(|q| {
            q.status = QueueStatus::Completed;
            q.clone()
        }))
    }

    async fn fail_queue_item(&self, queue_item_id: i64, reason: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.queue.iter_mut().find(|q| q.id == queue_item_id && !q.status.is_terminal()) {
            Some(item) => {
                item.status = QueueStatus::Failed;
                item.last_error = Some(reason.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn apply_retry(&self, queue_item_id: i64, decision: &RetryDecision) -> StoreResult<RetryOutcome> {
        let mut state = self.state.lock().unwrap();
        let Some(index) = state
            .queue
            .iter()
            .position(|q| q.id == queue_item_id && !q.status.is_terminal())
        else {
            return Ok(RetryOutcome::AlreadySettled);
        };

        match decision {
            RetryDecision::Retry { retry_count, scheduled_for } => {
                state.queue[index].status = QueueStatus::Completed;
                let parent = state.queue[index].clone();
                let id = state.next_id();
                state.queue.push(QueueItem {
                    id,
                    call_id: None,
                    status: QueueStatus::Queued,
                    retry_count: *retry_count,
                    scheduled_for: *scheduled_for,
                    parent_queue_id: Some(parent.id),
                    last_error: None,
                    ..parent
                });
                Ok(RetryOutcome::Requeued {
                    queue_item_id: id,
                    retry_count: *retry_count,
                    scheduled_for: *scheduled_for,
                })
            }
            RetryDecision::Exhausted => {
                state.queue[index].status = QueueStatus::Failed;
                state.queue[index].last_error = Some("Retries exhausted".to_string());
                Ok(RetryOutcome::Failed)
            }
        }
    }

    async fn campaign(&self, campaign_id: i64) -> StoreResult<Option<Campaign>> {
        let state = self.state.lock().unwrap();
        Ok(state.campaigns.iter().find(|c| c.id == campaign_id).cloned())
    }

    async fn complete_campaign_if_drained(&self, campaign_id: i64) -> StoreResult<Option<Campaign>> {
        let mut state = self.state.lock().unwrap();
        let pending = state
            .queue
            .iter()
            .any(|q| q.campaign_id == campaign_id && matches!(q.status, QueueStatus::Queued | QueueStatus::Processing));
        if pending {
            return Ok(None);
        }
        let campaign = state
            .campaigns
            .iter_mut()
            .find(|c| c.id == campaign_id && c.status == CampaignStatus::Active);
        Ok(campaign.map(|c| {
            c.status = CampaignStatus::Completed;
            c.completed_at = Some(Utc::now());
            c.clone()
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    CallCompleted { call_id: i64, transcript_id: i64 },
    CampaignCompleted(i64),
    RetryScheduled,
}

/// Hooks that report what they were asked to do over a channel.
pub struct RecordingHooks {
    events: mpsc::UnboundedSender<HookEvent>,
}

impl RecordingHooks {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HookEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { events: tx }, rx)
    }
}

#[async_trait]
impl LifecycleHooks for RecordingHooks {
    async fn call_completed(&self, call: Call, transcript: Transcript) {
        let _ = self.events.send(HookEvent::CallCompleted {
            call_id: call.id,
            transcript_id: transcript.id,
        });
    }

    async fn campaign_completed(&self, campaign: Campaign) {
        let _ = self.events.send(HookEvent::CampaignCompleted(campaign.id));
    }

    fn retry_scheduled(&self) {
        let _ = self.events.send(HookEvent::RetryScheduled);
    }
}
