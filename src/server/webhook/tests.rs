use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use super::memory_store::{HookEvent, MemoryCallStore, RecordingHooks};
use super::*;
use crate::models::{CampaignStatus, QueueStatus};

const AGENT: &str = "agent-1";
const USER: i64 = 7;

struct Harness {
    store: Arc<MemoryCallStore>,
    service: WebhookService,
    events: UnboundedReceiver<HookEvent>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryCallStore::new());
        store.add_agent(1, USER, AGENT);
        let (hooks, events) = RecordingHooks::new();
        let settings = WebhookSettings {
            settle_delay: Duration::ZERO,
            default_country_code: "+91".to_string(),
        };
        let service = WebhookService::new(store.clone(), Arc::new(hooks), settings);
        Self { store, service, events }
    }

    async fn send(&self, body: serde_json::Value) -> Result<WebhookOutcome, WebhookError> {
        let payload: WebhookPayload = serde_json::from_value(body).unwrap();
        self.service.handle(&payload).await
    }

    async fn next_event(&mut self) -> HookEvent {
        tokio::time::timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("hook was not called")
            .expect("hook channel closed")
    }

    fn no_more_events(&mut self) -> bool {
        self.events.try_recv().is_err()
    }
}

fn event(id: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "agent_id": AGENT,
        "status": status,
        "telephony_data": { "to_number": "5551234567", "call_type": "outbound" }
    })
}

/// Dial a call through `initiated` and attach it to a campaign queue item.
async fn campaign_call(h: &Harness, id: &str, max_retries: i32, retry_count: i32) -> i64 {
    h.store.add_contact(50, USER, "+91 5551234567");
    h.store.add_campaign(9, USER, max_retries, 30);
    h.send(event(id, "initiated")).await.unwrap();
    h.store.add_queue_item(9, 50, id, retry_count)
}

#[tokio::test]
async fn test_unknown_status_is_ignored() {
    let h = Harness::new();
    let outcome = h.send(event("exec-1", "queued")).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored { status: "queued".to_string() });
    assert!(h.store.calls().is_empty());

    let outcome = h.send(json!({ "id": "exec-1" })).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
}

#[tokio::test]
async fn test_initiated_creates_call_once() {
    let h = Harness::new();
    h.store.add_contact(50, USER, "+91 5551234567");

    let outcome = h.send(event("exec-1", "initiated")).await.unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::Processed {
            execution_id: "exec-1".to_string(),
            status: CallLifecycleStatus::Initiated
        }
    );
    h.send(event("exec-1", "initiated")).await.unwrap();

    let calls = h.store.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].phone_number, "+91 5551234567");
    assert_eq!(calls[0].contact_id, Some(50));
    assert_eq!(calls[0].user_id, USER);
    assert_eq!(calls[0].direction, CallDirection::Outbound);
}

#[tokio::test]
async fn test_initiated_requires_agent_and_number() {
    let h = Harness::new();

    let unknown_agent = json!({ "id": "exec-1", "agent_id": "nobody", "status": "initiated", "user_number": "5551234567" });
    assert!(matches!(h.send(unknown_agent).await, Err(WebhookError::AgentNotFound(_))));

    let no_number = json!({ "id": "exec-2", "agent_id": AGENT, "status": "initiated" });
    assert!(matches!(h.send(no_number).await, Err(WebhookError::MissingPhoneNumber(_))));

    assert!(h.store.calls().is_empty());
}

#[tokio::test]
async fn test_inbound_call_uses_caller_number_and_holds_slot() {
    let h = Harness::new();
    let body = json!({
        "id": "exec-in",
        "agent_id": AGENT,
        "status": "initiated",
        "telephony_data": { "from_number": "+1 4155550100", "to_number": "+91 8000000000", "call_type": "inbound" }
    });
    h.send(body).await.unwrap();

    let call = h.store.call("exec-in").unwrap();
    assert_eq!(call.direction, CallDirection::Inbound);
    assert_eq!(call.phone_number, "+1 4155550100");
    assert!(call.slot_held);
    assert_eq!(h.store.active_calls(USER), 1);

    h.send(json!({ "id": "exec-in", "status": "completed" })).await.unwrap();
    assert_eq!(h.store.active_calls(USER), 0);
    assert!(!h.store.call("exec-in").unwrap().slot_held);
}

#[tokio::test]
async fn test_full_lifecycle_bills_once_and_runs_chain() {
    let mut h = Harness::new();
    h.store.add_contact(50, USER, "+91 5551234567");

    h.send(event("exec-1", "initiated")).await.unwrap();
    h.send(event("exec-1", "ringing")).await.unwrap();
    h.send(event("exec-1", "in-progress")).await.unwrap();
    assert_eq!(h.store.contact(50).unwrap().lead_stage, "contacted");

    h.send(json!({
        "id": "exec-1",
        "status": "call-disconnected",
        "conversation_duration": 61.2,
        "transcript": "assistant: Hi, this is Maya\nuser: Hello\nnot a turn",
        "telephony_data": { "hangup_by": "user" }
    }))
    .await
    .unwrap();

    let completed = json!({
        "id": "exec-1",
        "status": "completed",
        "conversation_duration": 61.2,
        "telephony_data": { "recording_url": "https://rec.example/1.mp3" }
    });
    h.send(completed.clone()).await.unwrap();
    h.send(completed).await.unwrap();

    let call = h.store.call("exec-1").unwrap();
    assert_eq!(call.lifecycle_status, CallLifecycleStatus::Completed);
    assert_eq!(call.credits_used, 2);
    assert_eq!(call.duration_seconds, Some(62));
    assert_eq!(call.hangup_by.as_deref(), Some("user"));
    assert!(call.ringing_at.is_some() && call.answered_at.is_some());
    assert!(call.disconnected_at.is_some() && call.ended_at.is_some());
    assert_eq!(h.store.charges(), vec![(call.id, 2)]);

    let transcripts = h.store.transcripts();
    assert_eq!(transcripts.len(), 1);
    assert_eq!(transcripts[0].segments.0.len(), 2);
    assert_eq!(call.transcript_id, Some(transcripts[0].id));

    let expected = HookEvent::CallCompleted { call_id: call.id, transcript_id: transcripts[0].id };
    assert_eq!(h.next_event().await, expected);

    // The second delivery of `completed` must not start the chain again.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.no_more_events());
}

#[tokio::test]
async fn test_redelivered_completion_runs_chain_once() {
    let mut h = Harness::new();
    h.send(event("exec-1", "initiated")).await.unwrap();
    h.send(json!({ "id": "exec-1", "status": "call-disconnected", "transcript": "assistant: Hi\nuser: Hello" }))
        .await
        .unwrap();

    let completed = json!({ "id": "exec-1", "status": "completed", "conversation_duration": 30 });
    for _ in 0..3 {
        h.send(completed.clone()).await.unwrap();
    }

    assert!(matches!(h.next_event().await, HookEvent::CallCompleted { .. }));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.no_more_events());
    assert_eq!(h.store.charges().len(), 1);
}

#[tokio::test]
async fn test_disconnect_and_completed_in_either_order() {
    let transcript = "assistant: X\nuser: Y";
    for completed_first in [false, true] {
        let h = Harness::new();
        h.send(event("exec-1", "initiated")).await.unwrap();

        let disconnected = json!({ "id": "exec-1", "status": "call-disconnected", "transcript": transcript });
        let completed = json!({
            "id": "exec-1",
            "status": "completed",
            "telephony_data": { "recording_url": "https://rec.example/1.mp3" }
        });

        if completed_first {
            h.send(completed).await.unwrap();
            h.send(disconnected).await.unwrap();
        } else {
            h.send(disconnected).await.unwrap();
            h.send(completed).await.unwrap();
        }

        let call = h.store.call("exec-1").unwrap();
        assert_eq!(call.recording_url.as_deref(), Some("https://rec.example/1.mp3"));
        assert!(call.transcript_id.is_some(), "completed_first = {}", completed_first);
        assert_eq!(call.lifecycle_status, CallLifecycleStatus::Completed);
    }
}

#[tokio::test]
async fn test_completed_carries_late_transcript() {
    let mut h = Harness::new();
    h.send(event("exec-1", "initiated")).await.unwrap();
    h.send(json!({ "id": "exec-1", "status": "call-disconnected" })).await.unwrap();
    h.send(json!({ "id": "exec-1", "status": "completed", "transcript": "user: are you there?" }))
        .await
        .unwrap();

    let call = h.store.call("exec-1").unwrap();
    assert!(call.transcript_id.is_some());
    assert!(matches!(h.next_event().await, HookEvent::CallCompleted { .. }));
}

#[tokio::test]
async fn test_completed_without_transcript_skips_chain() {
    let mut h = Harness::new();
    h.send(event("exec-1", "initiated")).await.unwrap();
    h.send(json!({ "id": "exec-1", "status": "completed", "conversation_duration": 0 }))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.no_more_events());
    assert!(h.store.charges().is_empty());
}

#[tokio::test]
async fn test_completed_rebuilds_missing_call() {
    let h = Harness::new();
    let mut body = event("exec-lost", "completed");
    body["conversation_duration"] = json!(30);
    h.send(body).await.unwrap();

    let call = h.store.call("exec-lost").unwrap();
    assert_eq!(call.lifecycle_status, CallLifecycleStatus::Completed);
    assert_eq!(call.phone_number, "+91 5551234567");
    assert_eq!(call.credits_used, 1);
}

#[tokio::test]
async fn test_disconnect_for_unknown_call_is_fatal() {
    let h = Harness::new();
    let result = h.send(json!({ "id": "ghost", "status": "call-disconnected" })).await;
    assert!(matches!(result, Err(WebhookError::CallNotFound(_))));

    // Progress updates for unknown calls are only logged.
    assert!(h.send(json!({ "id": "ghost", "status": "ringing" })).await.is_ok());
}

#[tokio::test]
async fn test_status_never_moves_backwards() {
    let h = Harness::new();
    h.send(event("exec-1", "initiated")).await.unwrap();
    h.send(event("exec-1", "in-progress")).await.unwrap();
    h.send(event("exec-1", "ringing")).await.unwrap();
    assert_eq!(h.store.call("exec-1").unwrap().lifecycle_status, CallLifecycleStatus::InProgress);

    h.send(event("exec-1", "busy")).await.unwrap();
    h.send(event("exec-1", "completed")).await.unwrap();
    assert_eq!(h.store.call("exec-1").unwrap().lifecycle_status, CallLifecycleStatus::Busy);
}

#[tokio::test]
async fn test_busy_below_max_queues_one_retry() {
    let mut h = Harness::new();
    let item_id = campaign_call(&h, "exec-1", 3, 1).await;
    let before = Utc::now();

    h.send(event("exec-1", "busy")).await.unwrap();

    let queue = h.store.queue();
    assert_eq!(queue.len(), 2);
    let original = queue.iter().find(|q| q.id == item_id).unwrap();
    assert_eq!(original.status, QueueStatus::Completed);
    let successor = queue.iter().find(|q| q.id != item_id).unwrap();
    assert_eq!(successor.retry_count, 2);
    assert_eq!(successor.parent_queue_id, Some(item_id));
    assert_eq!(successor.status, QueueStatus::Queued);
    assert!(successor.scheduled_for > before);

    assert_eq!(h.store.contact(50).unwrap().busy_attempts, 1);
    assert_eq!(h.store.active_calls(USER), 0);
    assert_eq!(h.next_event().await, HookEvent::RetryScheduled);

    // A redelivered outcome changes nothing.
    h.send(event("exec-1", "busy")).await.unwrap();
    assert_eq!(h.store.queue().len(), 2);
    assert_eq!(h.store.contact(50).unwrap().busy_attempts, 1);
}

#[tokio::test]
async fn test_no_answer_at_max_fails_item_and_completes_campaign() {
    let mut h = Harness::new();
    let item_id = campaign_call(&h, "exec-1", 2, 2).await;

    h.send(event("exec-1", "no-answer")).await.unwrap();

    let queue = h.store.queue();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, item_id);
    assert_eq!(queue[0].status, QueueStatus::Failed);
    assert_eq!(h.store.contact(50).unwrap().no_answer_attempts, 1);
    assert_eq!(h.store.campaign_status(9), Some(CampaignStatus::Completed));
    assert_eq!(h.next_event().await, HookEvent::CampaignCompleted(9));
}

#[tokio::test]
async fn test_failed_call_is_not_retried() {
    let h = Harness::new();
    campaign_call(&h, "exec-1", 3, 0).await;

    let mut body = event("exec-1", "failed");
    body["error_message"] = json!("carrier rejected");
    h.send(body).await.unwrap();

    let queue = h.store.queue();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].status, QueueStatus::Failed);
    assert_eq!(queue[0].last_error.as_deref(), Some("carrier rejected"));
    let call = h.store.call("exec-1").unwrap();
    assert_eq!(call.lifecycle_status, CallLifecycleStatus::Failed);
    assert_eq!(call.hangup_reason.as_deref(), Some("carrier rejected"));
}

#[tokio::test]
async fn test_campaign_call_completion_links_campaign_and_finishes_queue() {
    let mut h = Harness::new();
    campaign_call(&h, "exec-1", 3, 0).await;

    h.send(json!({ "id": "exec-1", "status": "call-disconnected", "transcript": "user: hi" }))
        .await
        .unwrap();
    assert_eq!(h.store.call("exec-1").unwrap().campaign_id, Some(9));

    h.send(json!({ "id": "exec-1", "status": "completed", "conversation_duration": 12 }))
        .await
        .unwrap();
    assert_eq!(h.store.queue()[0].status, QueueStatus::Completed);
    assert_eq!(h.store.active_calls(USER), 0);

    let mut seen = vec![h.next_event().await, h.next_event().await];
    seen.sort_by_key(|e| matches!(e, HookEvent::CallCompleted { .. }));
    assert_eq!(seen[0], HookEvent::CampaignCompleted(9));
}

#[tokio::test]
async fn test_outcome_before_queue_link_is_settled_by_dialer() {
    let mut h = Harness::new();
    h.store.add_contact(50, USER, "+91 5551234567");
    h.store.add_campaign(9, USER, 3, 30);

    // The provider reports the whole call before the dialer records it.
    h.send(event("exec-1", "initiated")).await.unwrap();
    h.send(event("exec-1", "busy")).await.unwrap();
    assert!(h.store.queue().is_empty());

    let item_id = h.store.add_queue_item(9, 50, "exec-1", 0);
    let call = h.store.call("exec-1").unwrap();
    h.service.settle_dialed_call(&call).await.unwrap();

    let queue = h.store.queue();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.iter().find(|q| q.id == item_id).unwrap().status, QueueStatus::Completed);
    let successor = queue.iter().find(|q| q.id != item_id).unwrap();
    assert_eq!(successor.retry_count, 1);
    assert_eq!(successor.status, QueueStatus::Queued);
    assert_eq!(h.next_event().await, HookEvent::RetryScheduled);

    h.service.settle_dialed_call(&call).await.unwrap();
    assert_eq!(h.store.queue().len(), 2);
}

#[tokio::test]
async fn test_dialer_settle_ignores_live_calls() {
    let h = Harness::new();
    campaign_call(&h, "exec-1", 3, 0).await;

    let call = h.store.call("exec-1").unwrap();
    h.service.settle_dialed_call(&call).await.unwrap();
    assert_eq!(h.store.queue()[0].status, QueueStatus::Processing);
}
