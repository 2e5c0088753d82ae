//! Side effects that follow a call or campaign reaching its end
//!
//! None of these may fail a webhook. Every step logs its error and the
//! chain moves on.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::{Agent, Call, Campaign, ContactUpsert, LeadAnalyticsSummary, LeadExtraction, Transcript};
use crate::server::cache::TtlCache;
use crate::server::db;
use crate::server::email::EmailService;
use crate::server::followup::{FollowupComposer, FollowupContext};
use crate::server::meetings::MeetingService;
use crate::server::openai::OpenAiClient;
use crate::server::scheduler::SchedulerHandle;

#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    /// A call finished with a transcript. Runs detached from the webhook.
    async fn call_completed(&self, call: Call, transcript: Transcript);

    /// The last queue item of a campaign settled.
    async fn campaign_completed(&self, campaign: Campaign);

    /// A retry was queued; the dialer should look at the queue again.
    fn retry_scheduled(&self);
}

/// Production hooks: lead extraction, contact upsert, meeting booking,
/// follow-up and summary emails.
pub struct DownstreamActions {
    pub db: PgPool,
    pub openai: Option<Arc<OpenAiClient>>,
    pub meetings: Option<Arc<MeetingService>>,
    pub email: Option<Arc<EmailService>>,
    pub followups: FollowupComposer,
    pub scheduler: SchedulerHandle,
    pub analytics_summaries: Arc<TtlCache<i64, LeadAnalyticsSummary>>,
}

impl DownstreamActions {
    async fn extract(&self, agent: &Agent, call: &Call, transcript: &Transcript) -> Option<LeadExtraction> {
        let openai = self.openai.as_ref()?;
        let Some(prompt_id) = agent.extraction_prompt_id.as_deref() else {
            tracing::debug!("Agent {} has no extraction prompt, skipping analysis of call {}", agent.id, call.id);
            return None;
        };

        match openai.extract_lead_data(prompt_id, &transcript.content).await {
            Ok(extraction) => Some(extraction),
            Err(e) => {
                tracing::error!("Failed to extract lead data for call {}: {}", call.id, e);
                None
            }
        }
    }

    async fn upsert_contact(&self, call: &Call, extraction: &LeadExtraction) -> Option<i64> {
        let upsert = ContactUpsert {
            user_id: call.user_id,
            phone_number: call.phone_number.clone(),
            name: extraction.extraction.name.clone(),
            email: extraction.email().map(str::to_string),
            company: extraction.extraction.company_name.clone(),
        };

        let contact = match db::contacts::upsert_from_call(&self.db, &upsert).await {
            Ok(contact) => contact,
            Err(e) => {
                tracing::error!("Failed to upsert contact for call {}: {}", call.id, e);
                return call.contact_id;
            }
        };

        if call.contact_id.is_none() {
            if let Err(e) = db::calls::link_contact(&self.db, call.id, contact.id).await {
                tracing::warn!("Failed to link contact {} to call {}: {}", contact.id, call.id, e);
            }
        }
        Some(contact.id)
    }

    async fn book_meeting(&self, agent: &Agent, call: &Call, contact_id: Option<i64>, extraction: &LeadExtraction) {
        if !agent.auto_schedule_meetings {
            return;
        }
        let (Some(meetings), Some(start), Some(email)) =
            (self.meetings.as_ref(), extraction.demo_time(), extraction.email())
        else {
            return;
        };

        match meetings
            .schedule_for_call(call, contact_id, email, extraction.extraction.name.as_deref(), start)
            .await
        {
            Ok(meeting) => tracing::info!("Scheduled meeting {} for call {} at {}", meeting.id, call.id, meeting.start_time),
            Err(e) => tracing::error!("Failed to schedule meeting for call {}: {}", call.id, e),
        }
    }

    async fn send_followup(&self, agent: &Agent, call: &Call, transcript: &Transcript, extraction: &LeadExtraction) {
        if !agent.followup_email_enabled {
            return;
        }
        let (Some(email), Some(to)) = (self.email.as_ref(), extraction.email()) else {
            return;
        };

        let context = FollowupContext {
            name: extraction.extraction.name.clone(),
            company: extraction.extraction.company_name.clone(),
            requirements: extraction.extraction.requirements.clone(),
            agent_name: agent.name.clone(),
            demo_time: extraction.demo_time(),
            transcript: transcript.content.clone(),
        };
        let message = self.followups.compose(agent, &context).await;

        match email.send_followup(to, &message).await {
            Ok(()) => tracing::info!("Sent follow-up email for call {} to {}", call.id, to),
            Err(e) => tracing::error!("Failed to send follow-up email for call {}: {}", call.id, e),
        }
    }
}

#[async_trait]
impl LifecycleHooks for DownstreamActions {
    async fn call_completed(&self, call: Call, transcript: Transcript) {
        let agent = match db::agents::get_by_id(&self.db, call.agent_id).await {
            Ok(Some(agent)) => agent,
            Ok(None) => {
                tracing::warn!("Agent {} for call {} no longer exists", call.agent_id, call.id);
                return;
            }
            Err(e) => {
                tracing::error!("Failed to load agent for call {}: {}", call.id, e);
                return;
            }
        };

        let Some(extraction) = self.extract(&agent, &call, &transcript).await else {
            return;
        };

        let contact_id = self.upsert_contact(&call, &extraction).await;

        match db::lead_analytics::insert(&self.db, call.id, call.user_id, contact_id, &extraction, extraction.demo_time()).await {
            Ok(Some(analytics)) => {
                tracing::info!("Stored lead analytics {} for call {}", analytics.id, call.id);
                self.analytics_summaries.invalidate(&call.user_id).await;
            }
            Ok(None) => {
                tracing::info!("Call {} was already analysed, skipping follow-ups", call.id);
                return;
            }
            Err(e) => {
                tracing::error!("Failed to store lead analytics for call {}: {}", call.id, e);
            }
        }

        self.book_meeting(&agent, &call, contact_id, &extraction).await;
        self.send_followup(&agent, &call, &transcript, &extraction).await;
    }

    async fn campaign_completed(&self, campaign: Campaign) {
        tracing::info!("Campaign {} ({}) completed", campaign.id, campaign.name);
        if !campaign.summary_email_enabled {
            return;
        }
        let Some(email) = self.email.as_ref() else {
            return;
        };

        let summary = match db::campaigns::summary(&self.db, campaign.id).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!("Failed to summarise campaign {}: {}", campaign.id, e);
                return;
            }
        };
        let owner = match db::users::get_by_id(&self.db, campaign.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return,
            Err(e) => {
                tracing::error!("Failed to load owner of campaign {}: {}", campaign.id, e);
                return;
            }
        };

        if let Err(e) = email.send_campaign_summary(&owner.email, &owner.name, &campaign, &summary).await {
            tracing::error!("Failed to send summary email for campaign {}: {}", campaign.id, e);
        }
    }

    fn retry_scheduled(&self) {
        self.scheduler.reload();
    }
}
