//! HTTP API, mounted under `/tenant/{tenant_id}/chat`.
//!
//! Authentication happens upstream. The caller's identity arrives in the
//! `X-User-Id` header (and optionally `X-User-Name`); the tenant comes from
//! the path. Handlers only translate between HTTP and the chat service and
//! proposal engine.
//!
//! Approve and revert run the action executor, which blocks for up to the
//! configured execution timeout, so they go through `spawn_blocking`.

use std::convert::Infallible;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use dt_actions::ActionKind;
use dt_audit::{AuditError, ExecutionFilter, ExecutionStatus, ExportCriteria};
use dt_chat::{
    ChatError, ConversationQuery, ConversationUpdate, FeedbackInput, FeedbackQuery, MessageQuery,
    NewConversation, SendMessage,
};
use dt_proposals::{Actor, Permission, ProposalError, ProposalOverrides};

use crate::state::AppState;

const USER_ID_HEADER: &str = "x-user-id";
const USER_NAME_HEADER: &str = "x-user-name";

pub fn router(state: AppState) -> Router {
    let chat = Router::new()
        .route(
            "/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/conversations/{conversation_id}",
            get(get_conversation)
                .patch(update_conversation)
                .delete(delete_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(get_messages).post(send_message),
        )
        .route("/conversations/{conversation_id}/stream", get(stream))
        .route("/conversations/{conversation_id}/stream/cancel", post(cancel_stream))
        .route("/conversations/{conversation_id}/proposals", get(list_pending))
        .route("/proposals/{proposal_id}", get(get_proposal))
        .route("/proposals/{proposal_id}/approve", post(approve))
        .route("/proposals/{proposal_id}/reject", post(reject))
        .route("/proposals/{proposal_id}/modify", post(modify))
        .route("/actions", get(list_actions))
        .route("/actions/{action_id}", get(get_action))
        .route("/actions/{action_id}/revert", post(revert))
        .route("/actions/{action_id}/impact", get(impact))
        .route("/compliance/exports", get(list_exports).post(generate_export))
        .route("/messages/{message_id}/feedback", post(submit_feedback))
        .route("/feedback/summary", get(feedback_summary));

    Router::new()
        .nest("/tenant/{tenant_id}/chat", chat)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Errors ────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Chat(ChatError),
    Proposal(ProposalError),
    Audit(AuditError),
    Unauthorized(String),
    Forbidden(String),
    Internal(String),
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::Proposal(inner) => ApiError::Proposal(inner),
            other => ApiError::Chat(other),
        }
    }
}

impl From<ProposalError> for ApiError {
    fn from(e: ProposalError) -> Self {
        ApiError::Proposal(e)
    }
}

impl From<AuditError> for ApiError {
    fn from(e: AuditError) -> Self {
        ApiError::Audit(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Proposal(e) => match e {
                ProposalError::NotFound { .. } => StatusCode::NOT_FOUND,
                ProposalError::AccessDenied { .. } => StatusCode::FORBIDDEN,
                ProposalError::ProposalExpired { .. } => StatusCode::GONE,
                ProposalError::NotReversible(_) | ProposalError::AlreadyReverted(_) => {
                    StatusCode::BAD_REQUEST
                }
                ProposalError::RevertInProgress(_) => StatusCode::CONFLICT,
                e if e.is_validation() => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Chat(e) => match e {
                ChatError::NotFound { .. } => StatusCode::NOT_FOUND,
                ChatError::AccessDenied { .. } => StatusCode::FORBIDDEN,
                ChatError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                ChatError::Agent(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Audit(AuditError::ActionNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Audit(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Chat(e) => e.to_string(),
            ApiError::Proposal(e) => e.to_string(),
            ApiError::Audit(e) => e.to_string(),
            ApiError::Unauthorized(m) | ApiError::Forbidden(m) | ApiError::Internal(m) => m.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "request failed: {}", message);
        } else {
            tracing::debug!(status = status.as_u16(), "request rejected: {}", message);
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn actor(tenant_id: Uuid, headers: &HeaderMap) -> ApiResult<Actor> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing X-User-Id header".into()))?;
    let user_id = raw
        .parse::<Uuid>()
        .map_err(|_| ApiError::Unauthorized(format!("X-User-Id is not a UUID: {}", raw)))?;
    let actor = Actor::new(tenant_id, user_id);
    Ok(match headers.get(USER_NAME_HEADER).and_then(|v| v.to_str().ok()) {
        Some(name) if !name.trim().is_empty() => actor.with_name(name.trim()),
        _ => actor,
    })
}

fn require(state: &AppState, actor: &Actor, permission: Permission) -> ApiResult<()> {
    if state.chat.engine().permissions().has_permission(actor, permission) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!("missing permission {:?}", permission)))
    }
}

/// Run a blocking engine call off the async workers.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProposalError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("worker task failed: {}", e)))?
        .map_err(ApiError::from)
}

// ── Conversations ─────────────────────────────────────────────────

async fn list_conversations(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    headers: HeaderMap,
    Query(query): Query<ConversationQuery>,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    let page = state.chat.list_conversations(&actor, &query)?;
    Ok(Json(page).into_response())
}

async fn create_conversation(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<NewConversation>,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    let conversation = state.chat.create_conversation(&actor, body)?;
    Ok((StatusCode::CREATED, Json(conversation)).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct DetailQuery {
    #[serde(default)]
    include_messages: bool,
}

async fn get_conversation(
    State(state): State<AppState>,
    Path((tenant_id, conversation_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    Query(query): Query<DetailQuery>,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    let detail = state
        .chat
        .get_conversation(&actor, conversation_id, query.include_messages)?;
    Ok(Json(detail).into_response())
}

async fn update_conversation(
    State(state): State<AppState>,
    Path((tenant_id, conversation_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    Json(body): Json<ConversationUpdate>,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    let conversation = state.chat.update_conversation(&actor, conversation_id, body)?;
    Ok(Json(conversation).into_response())
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path((tenant_id, conversation_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let actor = actor(tenant_id, &headers)?;
    state.chat.delete_conversation(&actor, conversation_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Messages and streaming ────────────────────────────────────────

async fn get_messages(
    State(state): State<AppState>,
    Path((tenant_id, conversation_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    Query(query): Query<MessageQuery>,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    let messages = state.chat.get_messages(&actor, conversation_id, &query)?;
    Ok(Json(messages).into_response())
}

async fn send_message(
    State(state): State<AppState>,
    Path((tenant_id, conversation_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    Json(body): Json<SendMessage>,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    let sent = state.chat.send_message(&actor, conversation_id, body).await?;
    Ok((StatusCode::CREATED, Json(sent)).into_response())
}

/// Server-sent events for one conversation: completed replies, title
/// updates and proposal lifecycle events.
async fn stream(
    State(state): State<AppState>,
    Path((tenant_id, conversation_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    state.chat.get_conversation(&actor, conversation_id, false)?;
    let mut receiver = state.chat.hub().subscribe();
    tracing::info!(conversation_id = %conversation_id, user_id = %actor.user_id, "stream opened");

    let events = async_stream::stream! {
        let mut event_id: u64 = 0;
        yield Ok::<_, Infallible>(Event::default()
            .id(event_id.to_string())
            .event("connected")
            .data(conversation_id.to_string()));

        loop {
            match receiver.recv().await {
                Ok(event) if event.conversation_id() == conversation_id => {
                    event_id += 1;
                    match Event::default().id(event_id.to_string()).event(event.name()).json_data(&event) {
                        Ok(sse) => yield Ok(sse),
                        Err(e) => tracing::warn!(event = event.name(), "failed to encode stream event: {}", e),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(conversation_id = %conversation_id, skipped, "stream subscriber lagged");
                }
                Err(RecvError::Closed) => {
                    tracing::info!(conversation_id = %conversation_id, "stream closed");
                    break;
                }
            }
        }
    };
    Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response())
}

async fn cancel_stream(
    State(state): State<AppState>,
    Path((tenant_id, conversation_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    state.chat.cancel_stream(&actor, conversation_id)?;
    Ok(Json(serde_json::json!({ "cancelled": true })).into_response())
}

// ── Proposals ─────────────────────────────────────────────────────

async fn list_pending(
    State(state): State<AppState>,
    Path((tenant_id, conversation_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    let proposals = state.chat.engine().list_pending_proposals(&actor, conversation_id)?;
    Ok(Json(proposals).into_response())
}

async fn get_proposal(
    State(state): State<AppState>,
    Path((tenant_id, proposal_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    let proposal = state.chat.engine().get_proposal(&actor, proposal_id)?;
    Ok(Json(proposal).into_response())
}

async fn approve(
    State(state): State<AppState>,
    Path((tenant_id, proposal_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    let engine = state.chat.engine().clone();
    let approval = blocking(move || engine.approve_proposal(&actor, proposal_id)).await?;
    Ok(Json(approval).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct RejectBody {
    #[serde(default)]
    reason: Option<String>,
}

async fn reject(
    State(state): State<AppState>,
    Path((tenant_id, proposal_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    // The body is optional; an empty one means no reason.
    let reason = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<RejectBody>(&body)
            .map_err(|e| ApiError::Chat(ChatError::InvalidInput(format!("invalid reject body: {}", e))))?
            .reason
    };
    let proposal = state.chat.engine().reject_proposal(&actor, proposal_id, reason)?;
    Ok(Json(proposal).into_response())
}

async fn modify(
    State(state): State<AppState>,
    Path((tenant_id, proposal_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    Json(overrides): Json<ProposalOverrides>,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    let modification = state.chat.engine().modify_proposal(&actor, proposal_id, overrides)?;
    Ok(Json(modification).into_response())
}

// ── Executed actions ──────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct ActionQuery {
    #[serde(default)]
    conversation_id: Option<Uuid>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    action_type: Option<ActionKind>,
    #[serde(default)]
    status: Option<ExecutionStatus>,
    #[serde(default)]
    entity_id: Option<Uuid>,
    #[serde(default)]
    start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    end_date: Option<DateTime<Utc>>,
}

impl ActionQuery {
    fn into_filter(self) -> ExecutionFilter {
        ExecutionFilter {
            conversation_id: self.conversation_id,
            agent_ids: self.agent_id.into_iter().collect(),
            action_types: self.action_type.into_iter().collect(),
            status: self.status,
            affected_entity_id: self.entity_id,
            from: self.start_date,
            to: self.end_date,
            ..ExecutionFilter::default()
        }
    }
}

async fn list_actions(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    headers: HeaderMap,
    Query(query): Query<ActionQuery>,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    let actions = state
        .chat
        .engine()
        .list_executed_actions(&actor, query.into_filter())?;
    Ok(Json(actions).into_response())
}

async fn get_action(
    State(state): State<AppState>,
    Path((tenant_id, action_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    let action = state.chat.engine().get_executed_action(&actor, action_id)?;
    Ok(Json(action).into_response())
}

async fn revert(
    State(state): State<AppState>,
    Path((tenant_id, action_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    let engine = state.chat.engine().clone();
    let action = blocking(move || engine.revert_executed_action(&actor, action_id)).await?;
    Ok(Json(action).into_response())
}

async fn impact(
    State(state): State<AppState>,
    Path((tenant_id, action_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    let engine = state.chat.engine();
    engine.get_executed_action(&actor, action_id)?;
    let report = state
        .analyzer
        .analyze(engine.executions(), actor.tenant_id, action_id)?;
    Ok(Json(report).into_response())
}

// ── Compliance ────────────────────────────────────────────────────

async fn list_exports(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    require(&state, &actor, Permission::ConversationRead)?;
    let exports = state.exporter.list(actor.tenant_id)?;
    Ok(Json(exports).into_response())
}

async fn generate_export(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    headers: HeaderMap,
    Json(criteria): Json<ExportCriteria>,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    require(&state, &actor, Permission::ConversationEdit)?;
    let generated = state.exporter.generate(
        state.chat.engine().executions(),
        state.devtel.as_ref(),
        actor.tenant_id,
        actor.user_id,
        criteria,
    )?;
    state
        .chat
        .engine()
        .record_export(&actor, generated.export.id, generated.export.action_count);
    Ok((StatusCode::CREATED, Json(generated)).into_response())
}

// ── Feedback ──────────────────────────────────────────────────────

async fn submit_feedback(
    State(state): State<AppState>,
    Path((tenant_id, message_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    Json(body): Json<FeedbackInput>,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    let feedback = state.chat.submit_feedback(&actor, message_id, body)?;
    Ok((StatusCode::CREATED, Json(feedback)).into_response())
}

async fn feedback_summary(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    headers: HeaderMap,
    Query(query): Query<FeedbackQuery>,
) -> ApiResult<Response> {
    let actor = actor(tenant_id, &headers)?;
    let summary = state.chat.feedback_summary(&actor, &query)?;
    Ok(Json(summary).into_response())
}
