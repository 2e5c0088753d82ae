//! Campaign dialer
//!
//! A single background task drains the call queue:
//! - waits until the earliest queued item falls due, a reload is requested,
//!   or the poll interval passes
//! - claims due items of active campaigns (`SKIP LOCKED`, so two server
//!   instances never dial the same row)
//! - enforces each campaign's calling window
//! - takes a concurrency slot, dials through Bolna and records the call
//!
//! Retries are not decided here. The webhook service queues successor rows
//! and calls [`SchedulerHandle::reload`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use sqlx::PgPool;
use tokio::sync::Notify;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::models::{Agent, Call, CallDirection, CallLifecycleStatus, Campaign, NewCall, QueueItem};
use super::bolna::{BolnaClient, BolnaError};
use super::db;
use super::webhook::hooks::LifecycleHooks;
use super::webhook::WebhookService;

/// How long an item waits when its owner has no free call slot.
const CAPACITY_BACKOFF_SECS: i64 = 15;

/// Claimed items with no call recorded after this long are requeued.
const STALE_CLAIM_MINUTES: i32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Dial error: {0}")]
    Dial(#[from] BolnaError),

    #[error("No free call slot for user {0}")]
    NoCapacity(i64),

    #[error("Agent not found: {0}")]
    AgentNotFound(i64),
}

/// Wakes the dialer loop early.
#[derive(Clone, Default)]
pub struct SchedulerHandle {
    notify: Arc<Notify>,
}

impl SchedulerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reload(&self) {
        self.notify.notify_one();
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub from_number: Option<String>,
}

pub struct Scheduler {
    db: PgPool,
    bolna: BolnaClient,
    webhooks: Arc<WebhookService>,
    hooks: Arc<dyn LifecycleHooks>,
    handle: SchedulerHandle,
    settings: SchedulerSettings,
    shutdown: CancellationToken,
}

/// Whether `now` falls inside a daily calling window. A window whose end is
/// before its start runs overnight. Missing bounds are open.
pub fn within_window(now: NaiveTime, first: Option<NaiveTime>, last: Option<NaiveTime>) -> bool {
    match (first, last) {
        (None, None) => true,
        (Some(first), None) => now >= first,
        (None, Some(last)) => now <= last,
        (Some(first), Some(last)) if first <= last => now >= first && now <= last,
        (Some(first), Some(last)) => now >= first || now <= last,
    }
}

/// The next time the window opens after `now`.
pub fn next_window_start(now: DateTime<Utc>, first: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(first).and_utc();
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// Provider format: E.164 without the display space.
fn dial_number(phone: &str) -> String {
    phone.chars().filter(|c| !c.is_whitespace()).collect()
}

/// What happened to one claimed queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Dialed,
    Deferred,
    Failed,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct BatchTally {
    dialed: usize,
    deferred: usize,
    failed: usize,
}

impl BatchTally {
    fn record(&mut self, outcome: Dispatch) {
        match outcome {
            Dispatch::Dialed => self.dialed += 1,
            Dispatch::Deferred => self.deferred += 1,
            Dispatch::Failed => self.failed += 1,
        }
    }
}

/// Take a slot, dial, and record the call, linked to `queue_item_id` when
/// it came from a campaign. The slot is returned if the dial fails or the
/// call already ended by the time it is recorded.
#[allow(clippy::too_many_arguments)]
pub async fn place_call(
    pool: &PgPool,
    bolna: &BolnaClient,
    agent: &Agent,
    contact_id: Option<i64>,
    campaign_id: Option<i64>,
    queue_item_id: Option<i64>,
    phone_number: &str,
    from_number: Option<&str>,
) -> Result<Call, SchedulerError> {
    if !db::users::try_acquire_slot(pool, agent.user_id).await? {
        return Err(SchedulerError::NoCapacity(agent.user_id));
    }

    let execution_id = match bolna
        .initiate_call(&agent.bolna_agent_id, &dial_number(phone_number), from_number)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            if let Err(release_err) = db::users::release_slot(pool, agent.user_id).await {
                tracing::error!("Failed to release slot for user {}: {}", agent.user_id, release_err);
            }
            return Err(e.into());
        }
    };

    let new_call = NewCall {
        execution_id,
        user_id: agent.user_id,
        agent_id: agent.id,
        contact_id,
        campaign_id,
        direction: CallDirection::Outbound,
        phone_number: phone_number.to_string(),
        status: CallLifecycleStatus::Initiated,
        slot_held: true,
    };
    let call = match db::calls::insert_dialed(pool, &new_call, queue_item_id).await {
        Ok(call) => call,
        Err(e) => {
            if let Err(release_err) = db::users::release_slot(pool, agent.user_id).await {
                tracing::error!("Failed to release slot for user {}: {}", agent.user_id, release_err);
            }
            return Err(e.into());
        }
    };

    if !call.slot_held {
        // The provider already reported the end of this call.
        db::users::release_slot(pool, agent.user_id).await?;
    }
    Ok(call)
}

impl Scheduler {
    pub fn new(
        db: PgPool,
        bolna: BolnaClient,
        webhooks: Arc<WebhookService>,
        hooks: Arc<dyn LifecycleHooks>,
        handle: SchedulerHandle,
        settings: SchedulerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            bolna,
            webhooks,
            hooks,
            handle,
            settings,
            shutdown,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        tracing::info!("Campaign scheduler started");

        loop {
            if let Err(e) = self.dispatch_due().await {
                tracing::error!("Failed to dispatch queued calls: {}", e);
            }

            let wait = self.next_wait().await;
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.handle.notify.notified() => {
                    tracing::debug!("Scheduler reload requested");
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        tracing::info!("Campaign scheduler stopped");
    }

    async fn next_wait(&self) -> Duration {
        let poll = self.settings.poll_interval;
        match db::queue::next_due_at(&self.db).await {
            Ok(Some(due)) => (due - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .clamp(Duration::from_millis(500), poll),
            Ok(None) => poll,
            Err(e) => {
                tracing::warn!("Failed to read next queue due time: {}", e);
                poll
            }
        }
    }

    async fn dispatch_due(&self) -> Result<(), SchedulerError> {
        match db::queue::release_stale(&self.db, STALE_CLAIM_MINUTES).await {
            Ok(0) => {}
            Ok(n) => tracing::warn!("Requeued {} queue items stuck in processing", n),
            Err(e) => tracing::error!("Failed to requeue stale queue items: {}", e),
        }

        let items = db::queue::claim_due(&self.db, self.settings.batch_size).await?;
        if items.is_empty() {
            return Ok(());
        }
        tracing::debug!("Claimed {} queued calls", items.len());

        let tally = self.dispatch_batch(items).await;
        tracing::debug!("Dispatch batch finished: {:?}", tally);
        Ok(())
    }

    /// Every claimed item leaves here dialed, handed back, or failed; an
    /// error on one item never strands the rest in `Processing`.
    async fn dispatch_batch(&self, items: Vec<QueueItem>) -> BatchTally {
        let mut tally = BatchTally::default();
        let mut campaigns: HashMap<i64, Option<(Campaign, Option<Agent>)>> = HashMap::new();

        for item in items {
            if !campaigns.contains_key(&item.campaign_id) {
                match self.load_campaign(item.campaign_id).await {
                    Ok(loaded) => {
                        campaigns.insert(item.campaign_id, loaded);
                    }
                    Err(e) => {
                        tracing::error!("Failed to load campaign {}: {}", item.campaign_id, e);
                        tally.record(self.defer(&item, None).await);
                        continue;
                    }
                }
            }

            let outcome = match campaigns.get(&item.campaign_id) {
                Some(Some((campaign, agent))) => self.dispatch(&item, campaign, agent.as_ref()).await,
                _ => {
                    tracing::warn!("Queue item {} belongs to missing campaign {}", item.id, item.campaign_id);
                    self.fail_item(&item, "Campaign not found").await
                }
            };
            tally.record(outcome);
        }
        tally
    }

    async fn load_campaign(&self, campaign_id: i64) -> Result<Option<(Campaign, Option<Agent>)>, SchedulerError> {
        let Some(campaign) = db::campaigns::get_by_id(&self.db, campaign_id).await? else {
            return Ok(None);
        };
        let agent = db::agents::get_by_id(&self.db, campaign.agent_id).await?;
        Ok(Some((campaign, agent)))
    }

    /// Hand a claimed item back to the queue. If even that fails, the stale
    /// claim sweep picks it up later.
    async fn defer(&self, item: &QueueItem, until: Option<DateTime<Utc>>) -> Dispatch {
        if let Err(e) = db::queue::release(&self.db, item.id, until).await {
            tracing::error!("Failed to defer queue item {}: {}", item.id, e);
        }
        Dispatch::Deferred
    }

    async fn dispatch(&self, item: &QueueItem, campaign: &Campaign, agent: Option<&Agent>) -> Dispatch {
        let now = Utc::now();
        if !within_window(now.time(), campaign.first_call_time, campaign.last_call_time) {
            let reopen = campaign
                .first_call_time
                .map(|first| next_window_start(now, first));
            tracing::debug!("Campaign {} outside calling window, deferring item {}", campaign.id, item.id);
            return self.defer(item, reopen).await;
        }

        let result = match agent {
            Some(agent) => {
                place_call(
                    &self.db,
                    &self.bolna,
                    agent,
                    Some(item.contact_id),
                    Some(campaign.id),
                    Some(item.id),
                    &item.phone_number,
                    self.settings.from_number.as_deref(),
                )
                .await
            }
            None => Err(SchedulerError::AgentNotFound(campaign.agent_id)),
        };

        match result {
            Ok(call) => {
                tracing::info!("Dialed {} for campaign {} (call {})", item.phone_number, campaign.id, call.execution_id);
                if call.lifecycle_status.is_terminal() {
                    if let Err(e) = self.webhooks.settle_dialed_call(&call).await {
                        tracing::error!("Failed to settle queue item {} of call {}: {}", item.id, call.execution_id, e);
                    }
                }
                Dispatch::Dialed
            }
            Err(SchedulerError::NoCapacity(user_id)) => {
                tracing::debug!("User {} at call capacity, deferring item {}", user_id, item.id);
                self.defer(item, Some(now + ChronoDuration::seconds(CAPACITY_BACKOFF_SECS))).await
            }
            Err(e) => {
                tracing::error!("Failed to dial queue item {}: {}", item.id, e);
                self.fail_item(item, &e.to_string()).await
            }
        }
    }

    async fn fail_item(&self, item: &QueueItem, reason: &str) -> Dispatch {
        if let Err(e) = db::queue::fail(&self.db, item.id, reason).await {
            tracing::error!("Failed to mark queue item {} failed: {}", item.id, e);
            return self.defer(item, None).await;
        }
        match db::campaigns::complete_if_drained(&self.db, item.campaign_id).await {
            Ok(Some(campaign)) => {
                let hooks = Arc::clone(&self.hooks);
                tokio::spawn(async move { hooks.campaign_completed(campaign).await });
            }
            Ok(None) => {}
            Err(e) => tracing::error!("Failed to check completion of campaign {}: {}", item.campaign_id, e),
        }
        Dispatch::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_daytime_window() {
        let (first, last) = (Some(t(9, 0)), Some(t(18, 0)));
        assert!(within_window(t(9, 0), first, last));
        assert!(within_window(t(12, 30), first, last));
        assert!(within_window(t(18, 0), first, last));
        assert!(!within_window(t(8, 59), first, last));
        assert!(!within_window(t(22, 0), first, last));
    }

    #[test]
    fn test_overnight_window() {
        let (first, last) = (Some(t(22, 0)), Some(t(2, 0)));
        assert!(within_window(t(23, 0), first, last));
        assert!(within_window(t(1, 0), first, last));
        assert!(!within_window(t(12, 0), first, last));
    }

    #[test]
    fn test_open_bounds() {
        assert!(within_window(t(3, 0), None, None));
        assert!(!within_window(t(3, 0), Some(t(9, 0)), None));
        assert!(within_window(t(3, 0), None, Some(t(9, 0))));
    }

    #[test]
    fn test_next_window_start() {
        let morning = Utc.with_ymd_and_hms(2025, 3, 4, 7, 0, 0).unwrap();
        assert_eq!(next_window_start(morning, t(9, 0)), Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).unwrap());

        let evening = Utc.with_ymd_and_hms(2025, 3, 4, 20, 0, 0).unwrap();
        assert_eq!(next_window_start(evening, t(9, 0)), Utc.with_ymd_and_hms(2025, 3, 5, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_dial_number_strips_spaces() {
        assert_eq!(dial_number("+91 5551234567"), "+915551234567");
    }

    fn queued(id: i64, campaign_id: i64) -> QueueItem {
        QueueItem {
            id,
            user_id: 7,
            campaign_id,
            contact_id: 50 + id,
            call_id: None,
            phone_number: "+91 5551234567".to_string(),
            status: crate::models::QueueStatus::Processing,
            retry_count: 0,
            scheduled_for: Utc::now(),
            parent_queue_id: None,
            last_error: None,
        }
    }

    /// Scheduler whose database is unreachable.
    fn offline_scheduler() -> Scheduler {
        use crate::server::webhook::memory_store::{MemoryCallStore, RecordingHooks};
        use crate::server::webhook::WebhookSettings;

        let pool = sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("postgres://call_agent@127.0.0.1:1/call_agent")
            .unwrap();
        let (hooks, _events) = RecordingHooks::new();
        let hooks: Arc<dyn LifecycleHooks> = Arc::new(hooks);
        let webhooks = WebhookService::new(Arc::new(MemoryCallStore::new()), Arc::clone(&hooks), WebhookSettings::default());

        Scheduler::new(
            pool,
            BolnaClient::new(String::new(), "http://127.0.0.1:1".to_string()),
            Arc::new(webhooks),
            hooks,
            SchedulerHandle::new(),
            SchedulerSettings {
                poll_interval: Duration::from_secs(30),
                batch_size: 10,
                from_number: None,
            },
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_batch_survives_database_errors() {
        let scheduler = offline_scheduler();
        let items = vec![queued(1, 9), queued(2, 9), queued(3, 10)];

        let tally = scheduler.dispatch_batch(items).await;
        assert_eq!(tally, BatchTally { dialed: 0, deferred: 3, failed: 0 });
    }

    #[tokio::test]
    async fn test_reload_wakes_waiter() {
        let handle = SchedulerHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.notify.notified().await });
        handle.reload();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
