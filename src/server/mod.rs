//! Server-side code for the call agent platform
//!
//! This module contains all backend functionality:
//! - Database access (PostgreSQL via sqlx)
//! - Bolna webhook ingestion and the call lifecycle state machine
//! - Campaign dialing
//! - Lead analysis, meetings and follow-up email
//! - Authentication (JWT + sessions)
//! - API routes

pub mod db;
pub mod auth;
pub mod bolna;
pub mod cache;
pub mod calendar;
pub mod config;
pub mod email;
pub mod followup;
pub mod meetings;
pub mod openai;
pub mod phone;
pub mod scheduler;
pub mod webhook;

use axum::{
    routing::{get, post, put},
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use sqlx::PgPool;
use std::fmt::Display;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{CorsLayer, Any};
use axum::http::Method;
use tower_http::trace::TraceLayer;

use crate::models::*;
use serde::Deserialize;

use self::bolna::{BolnaClient, BolnaError};
use self::cache::TtlCache;
use self::config::ServerConfig;
use self::meetings::{MeetingError, MeetingService};
use self::scheduler::{Scheduler, SchedulerError, SchedulerHandle, SchedulerSettings};
use self::webhook::hooks::DownstreamActions;
use self::webhook::retry;
use self::webhook::store::PgCallStore;
use self::webhook::{WebhookService, WebhookSettings};

/// Application state shared across all routes
pub struct AppState {
    pub db: PgPool,
    pub webhooks: Arc<WebhookService>,
    pub bolna: BolnaClient,
    pub scheduler: SchedulerHandle,
    pub meetings: Option<Arc<MeetingService>>,
    pub agents_cache: Arc<TtlCache<i64, Vec<Agent>>>,
    pub analytics_summaries: Arc<TtlCache<i64, LeadAnalyticsSummary>>,
    pub jwt_secret: String,
    pub session_ttl_hours: i64,
    pub default_country_code: String,
    pub bolna_from_number: Option<String>,
}

/// Create the Axum router with all API routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/api/health", get(health_check))

        // Provider webhooks
        .route("/api/webhooks/bolna", post(webhook::handle_bolna_webhook))

        // Auth routes
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/logout", post(auth::logout))

        // Call routes
        .route("/api/calls", get(get_calls).post(dial_call))
        .route("/api/calls/{id}", get(get_call))
        .route("/api/calls/{id}/transcript", get(get_call_transcript))

        // Agent routes
        .route("/api/agents", get(get_agents).post(create_agent))

        // Contact routes
        .route("/api/contacts", get(get_contacts).post(create_contact))
        .route("/api/contacts/{id}", get(get_contact))

        // Lead analytics
        .route("/api/lead-analytics", get(get_lead_analytics))
        .route("/api/lead-analytics/summary", get(get_lead_analytics_summary))

        // Campaign routes
        .route("/api/campaigns", get(get_campaigns).post(create_campaign))
        .route("/api/campaigns/{id}", get(get_campaign))
        .route("/api/campaigns/{id}/start", post(start_campaign))
        .route("/api/campaigns/{id}/pause", post(pause_campaign))
        .route("/api/campaigns/{id}/contacts", post(enqueue_campaign_contacts))

        // Meeting routes
        .route("/api/meetings", get(get_meetings))
        .route("/api/meetings/{id}", put(reschedule_meeting).delete(cancel_meeting))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

fn internal_error(context: &str, e: impl Display) -> StatusCode {
    tracing::error!("Failed to {}: {}", context, e);
    StatusCode::INTERNAL_SERVER_ERROR
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

impl ListQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 500)
    }
}

/// Drop repeated ids, keeping first-seen order.
fn unique_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

// Health check
async fn health_check() -> &'static str {
    "OK"
}

// ============== Call Routes ==============

async fn get_calls(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Call>>, StatusCode> {
    db::calls::list_for_user(&state.db, claims.sub, query.limit())
        .await
        .map(Json)
        .map_err(|e| internal_error("list calls", e))
}

async fn get_call(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<i64>,
) -> Result<Json<Call>, StatusCode> {
    db::calls::get_for_user(&state.db, claims.sub, id)
        .await
        .map_err(|e| internal_error("load call", e))?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_call_transcript(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<i64>,
) -> Result<Json<Transcript>, StatusCode> {
    db::transcripts::get_for_user(&state.db, claims.sub, id)
        .await
        .map_err(|e| internal_error("load transcript", e))?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Dial a single number outside any campaign.
async fn dial_call(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Json(req): Json<DialRequest>,
) -> Result<Json<DialResponse>, StatusCode> {
    let phone_number = phone::normalize_phone(&req.phone_number, &state.default_country_code)
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let agent = db::agents::get_for_user(&state.db, claims.sub, req.agent_id)
        .await
        .map_err(|e| internal_error("load agent", e))?
        .ok_or(StatusCode::NOT_FOUND)?;

    let contact_id = match req.contact_id {
        Some(id) => Some(id),
        None => db::contacts::find_id_by_phone(&state.db, claims.sub, &phone_number)
            .await
            .map_err(|e| internal_error("look up contact", e))?,
    };

    let call = scheduler::place_call(
        &state.db,
        &state.bolna,
        &agent,
        contact_id,
        None,
        None,
        &phone_number,
        state.bolna_from_number.as_deref(),
    )
    .await
    .map_err(|e| match e {
        SchedulerError::NoCapacity(_) => StatusCode::TOO_MANY_REQUESTS,
        SchedulerError::Dial(BolnaError::NotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
        SchedulerError::Dial(e) => {
            tracing::error!("Failed to dial {}: {}", phone_number, e);
            StatusCode::BAD_GATEWAY
        }
        e => internal_error("place call", e),
    })?;

    tracing::info!("User {} dialed {} (call {})", claims.sub, phone_number, call.execution_id);
    Ok(Json(DialResponse {
        call_id: call.id,
        execution_id: call.execution_id,
        status: call.lifecycle_status,
    }))
}

// ============== Agent Routes ==============

async fn get_agents(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
) -> Result<Json<Vec<Agent>>, StatusCode> {
    let pool = state.db.clone();
    let user_id = claims.sub;
    state
        .agents_cache
        .get_or_load(user_id, move || async move { db::agents::list_for_user(&pool, user_id).await })
        .await
        .map(Json)
        .map_err(|e| internal_error("list agents", e))
}

/// Register a provider agent. The name defaults to the one configured at
/// the provider.
async fn create_agent(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Json(req): Json<CreateAgentRequest>,
) -> Result<Json<Agent>, StatusCode> {
    let bolna_agent_id = req.bolna_agent_id.trim();
    if bolna_agent_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let name = match req.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => match state.bolna.get_agent(bolna_agent_id).await {
            Ok(remote) => {
                tracing::debug!("Fetched provider agent {}", remote.id);
                remote.agent_name.unwrap_or_else(|| bolna_agent_id.to_string())
            }
            Err(BolnaError::Api { status: 404, .. }) => return Err(StatusCode::NOT_FOUND),
            Err(e) => {
                tracing::warn!("Failed to fetch provider agent {}: {}", bolna_agent_id, e);
                bolna_agent_id.to_string()
            }
        },
    };

    let agent = match db::agents::create(&state.db, claims.sub, &name, &req).await {
        Ok(agent) => agent,
        Err(e) if db::is_unique_violation(&e) => return Err(StatusCode::CONFLICT),
        Err(e) => return Err(internal_error("create agent", e)),
    };

    state.agents_cache.invalidate(&claims.sub).await;
    Ok(Json(agent))
}

// ============== Contact Routes ==============

async fn get_contacts(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
) -> Result<Json<Vec<Contact>>, StatusCode> {
    db::contacts::list_for_user(&state.db, claims.sub)
        .await
        .map(Json)
        .map_err(|e| internal_error("list contacts", e))
}

async fn get_contact(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<i64>,
) -> Result<Json<Contact>, StatusCode> {
    db::contacts::get_for_user(&state.db, claims.sub, id)
        .await
        .map_err(|e| internal_error("load contact", e))?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn create_contact(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Json(req): Json<CreateContactRequest>,
) -> Result<Json<Contact>, StatusCode> {
    let phone_number = phone::normalize_phone(&req.phone_number, &state.default_country_code)
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    match db::contacts::create(&state.db, claims.sub, &phone_number, &req).await {
        Ok(contact) => Ok(Json(contact)),
        Err(e) if db::is_unique_violation(&e) => Err(StatusCode::CONFLICT),
        Err(e) => Err(internal_error("create contact", e)),
    }
}

// ============== Lead Analytics Routes ==============

async fn get_lead_analytics(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<LeadAnalyticsView>>, StatusCode> {
    let rows = db::lead_analytics::list_for_user(&state.db, claims.sub, query.limit())
        .await
        .map_err(|e| internal_error("list lead analytics", e))?;
    Ok(Json(rows.iter().map(LeadAnalytics::to_view).collect()))
}

async fn get_lead_analytics_summary(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
) -> Result<Json<LeadAnalyticsSummary>, StatusCode> {
    let pool = state.db.clone();
    let user_id = claims.sub;
    state
        .analytics_summaries
        .get_or_load(user_id, move || async move {
            let rows = db::lead_analytics::list_for_user(&pool, user_id, i64::MAX).await?;
            Ok::<_, sqlx::Error>(LeadAnalyticsSummary::from_rows(&rows))
        })
        .await
        .map(Json)
        .map_err(|e| internal_error("summarise lead analytics", e))
}

// ============== Campaign Routes ==============

async fn get_campaigns(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
) -> Result<Json<Vec<Campaign>>, StatusCode> {
    db::campaigns::list_for_user(&state.db, claims.sub)
        .await
        .map(Json)
        .map_err(|e| internal_error("list campaigns", e))
}

async fn get_campaign(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<i64>,
) -> Result<Json<Campaign>, StatusCode> {
    db::campaigns::get_for_user(&state.db, claims.sub, id)
        .await
        .map_err(|e| internal_error("load campaign", e))?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn create_campaign(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<Json<Campaign>, StatusCode> {
    if req.name.trim().is_empty() || req.max_retries.is_some_and(|r| r < 0) {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.retry_interval_minutes.is_some_and(|m| !retry::is_valid_delay(m.into()))
        || req.custom_retry_schedule.as_ref().is_some_and(|s| !s.iter().copied().all(retry::is_valid_delay))
    {
        return Err(StatusCode::BAD_REQUEST);
    }

    db::agents::get_for_user(&state.db, claims.sub, req.agent_id)
        .await
        .map_err(|e| internal_error("load agent", e))?
        .ok_or(StatusCode::NOT_FOUND)?;

    db::campaigns::create(&state.db, claims.sub, &req)
        .await
        .map(Json)
        .map_err(|e| internal_error("create campaign", e))
}

async fn set_campaign_status(
    state: &AppState,
    user_id: i64,
    id: i64,
    status: CampaignStatus,
) -> Result<Campaign, StatusCode> {
    let campaign = db::campaigns::get_for_user(&state.db, user_id, id)
        .await
        .map_err(|e| internal_error("load campaign", e))?
        .ok_or(StatusCode::NOT_FOUND)?;

    if campaign.status == CampaignStatus::Completed {
        return Err(StatusCode::CONFLICT);
    }

    db::campaigns::update_status(&state.db, campaign.id, status)
        .await
        .map_err(|e| internal_error("update campaign status", e))
}

async fn start_campaign(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<i64>,
) -> Result<Json<Campaign>, StatusCode> {
    let campaign = set_campaign_status(&state, claims.sub, id, CampaignStatus::Active).await?;
    state.scheduler.reload();
    tracing::info!("Campaign {} started", campaign.id);
    Ok(Json(campaign))
}

async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<i64>,
) -> Result<Json<Campaign>, StatusCode> {
    let campaign = set_campaign_status(&state, claims.sub, id, CampaignStatus::Paused).await?;
    tracing::info!("Campaign {} paused", campaign.id);
    Ok(Json(campaign))
}

async fn enqueue_campaign_contacts(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<i64>,
    Json(req): Json<EnqueueContactsRequest>,
) -> Result<Json<Vec<QueueItem>>, StatusCode> {
    let campaign = db::campaigns::get_for_user(&state.db, claims.sub, id)
        .await
        .map_err(|e| internal_error("load campaign", e))?
        .ok_or(StatusCode::NOT_FOUND)?;

    if campaign.status == CampaignStatus::Completed {
        return Err(StatusCode::CONFLICT);
    }

    let contact_ids = unique_ids(&req.contact_ids);
    let contacts = db::contacts::get_many_for_user(&state.db, claims.sub, &contact_ids)
        .await
        .map_err(|e| internal_error("load contacts", e))?;
    if contacts.len() != contact_ids.len() {
        return Err(StatusCode::NOT_FOUND);
    }

    let scheduled_for = req.scheduled_for.unwrap_or_else(chrono::Utc::now);
    let queued = db::queue::enqueue_contacts(&state.db, claims.sub, campaign.id, &contacts, scheduled_for)
        .await
        .map_err(|e| internal_error("enqueue contacts", e))?;

    state.scheduler.reload();
    Ok(Json(queued))
}

// ============== Meeting Routes ==============

fn meeting_error(e: MeetingError) -> StatusCode {
    match e {
        MeetingError::NotFound(_) => StatusCode::NOT_FOUND,
        MeetingError::Cancelled(_) => StatusCode::CONFLICT,
        MeetingError::NoIntegration(_) => StatusCode::PRECONDITION_FAILED,
        MeetingError::Calendar(e) => {
            tracing::error!("Calendar request failed: {}", e);
            StatusCode::BAD_GATEWAY
        }
        MeetingError::Database(e) => internal_error("update meeting", e),
    }
}

async fn get_meetings(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
) -> Result<Json<Vec<Meeting>>, StatusCode> {
    db::meetings::list_for_user(&state.db, claims.sub)
        .await
        .map(Json)
        .map_err(|e| internal_error("list meetings", e))
}

async fn reschedule_meeting(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<i64>,
    Json(req): Json<RescheduleMeetingRequest>,
) -> Result<Json<Meeting>, StatusCode> {
    let meetings = state.meetings.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)?;
    meetings
        .reschedule(claims.sub, id, req.start_time, req.duration_minutes)
        .await
        .map(Json)
        .map_err(meeting_error)
}

async fn cancel_meeting(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<i64>,
) -> Result<Json<Meeting>, StatusCode> {
    let meetings = state.meetings.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)?;
    meetings
        .cancel(claims.sub, id)
        .await
        .map(Json)
        .map_err(meeting_error)
}

/// Run the server
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    // Initialize database
    let pool = db::init_pool(&config.database_url).await?;

    // Run migrations (non-fatal if already applied)
    if let Err(e) = db::run_migrations(&pool).await {
        tracing::warn!("Migration warning (may be already applied): {}", e);
    }

    if config.bolna_api_key.is_empty() {
        tracing::warn!("BOLNA_API_KEY not set. Outbound dialing will be disabled.");
    }
    let bolna = BolnaClient::new(config.bolna_api_key.clone(), config.bolna_base_url.clone());

    let openai = match &config.openai_api_key {
        Some(key) => Some(Arc::new(openai::OpenAiClient::new(key.clone(), config.openai_model.clone()))),
        None => {
            tracing::warn!("OPENAI_API_KEY not set. Lead analysis will be disabled.");
            None
        }
    };

    let email = match email::EmailService::from_env() {
        Ok(service) => Some(Arc::new(service)),
        Err(e) => {
            tracing::warn!("Email service not configured: {}. Email features will be disabled.", e);
            None
        }
    };

    let meetings = match calendar::GoogleCalendarClient::from_env() {
        Ok(client) => Some(Arc::new(MeetingService::new(pool.clone(), client))),
        Err(e) => {
            tracing::warn!("Google Calendar not configured: {}. Meeting booking will be disabled.", e);
            None
        }
    };

    let scheduler_handle = SchedulerHandle::new();
    let analytics_summaries = Arc::new(TtlCache::new(config.cache_ttl, config.cache_refresh_ratio));
    let agents_cache = Arc::new(TtlCache::new(config.cache_ttl, config.cache_refresh_ratio));

    let hooks = Arc::new(DownstreamActions {
        db: pool.clone(),
        openai: openai.clone(),
        meetings: meetings.clone(),
        email,
        followups: followup::FollowupComposer::new(openai),
        scheduler: scheduler_handle.clone(),
        analytics_summaries: Arc::clone(&analytics_summaries),
    });

    let webhooks = Arc::new(WebhookService::new(
        Arc::new(PgCallStore::new(pool.clone())),
        hooks.clone(),
        WebhookSettings {
            settle_delay: config.webhook_settle_delay,
            default_country_code: config.default_country_code.clone(),
        },
    ));

    let shutdown = CancellationToken::new();
    let scheduler_task = Scheduler::new(
        pool.clone(),
        bolna.clone(),
        Arc::clone(&webhooks),
        hooks,
        scheduler_handle.clone(),
        SchedulerSettings {
            poll_interval: config.scheduler_poll_interval,
            batch_size: config.scheduler_batch_size,
            from_number: config.bolna_from_number.clone(),
        },
        shutdown.clone(),
    )
    .spawn();

    let state = AppState {
        db: pool,
        webhooks,
        bolna,
        scheduler: scheduler_handle,
        meetings,
        agents_cache,
        analytics_summaries,
        jwt_secret: config.jwt_secret.clone(),
        session_ttl_hours: config.session_ttl_hours,
        default_country_code: config.default_country_code.clone(),
        bolna_from_number: config.bolna_from_number.clone(),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!("Server running on http://0.0.0.0:{}", config.port);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = scheduler_task.await {
        tracing::warn!("Scheduler task ended abnormally: {}", e);
    }

    Ok(())
}
