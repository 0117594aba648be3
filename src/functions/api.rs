use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Error;
use crate::functions::{AppState, webhook};
use crate::schema::{Conversation, Priority, TicketStatus};

/// HTTP mapping for domain failures. Conflict-shaped errors (state machine
/// rejections, capacity) come back 409 so clients can tell a bad request from
/// a lost race.
fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::UnknownCategory(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::InvalidTransition { .. }
        | Error::DuplicateEvent(_)
        | Error::AgentInactive(_)
        | Error::AgentAtCapacity(_)
        | Error::AutoAssignDisabled(_) => StatusCode::CONFLICT,
        Error::AgentUnavailable | Error::ConcurrencyTimeout(_) | Error::ExternalService(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn load_conversation(state: &AppState, id: Uuid) -> Result<Conversation, Error> {
    state
        .store
        .conversation(id)
        .await?
        .ok_or_else(|| Error::not_found("conversation", id))
}

#[derive(Deserialize)]
struct AssignBody {
    agent_id: Uuid,
    #[serde(default = "default_actor")]
    assigned_by: String,
}

#[derive(Deserialize)]
struct ReleaseBody {
    agent_id: Uuid,
    #[serde(default = "default_reason")]
    reason: String,
}

#[derive(Deserialize)]
struct TransferBody {
    from_agent: Uuid,
    to_agent: Uuid,
    #[serde(default = "default_reason")]
    reason: String,
}

#[derive(Deserialize)]
struct ActorBody {
    #[serde(default = "default_actor")]
    actor: String,
}

#[derive(Deserialize)]
struct PriorityBody {
    priority: Priority,
    #[serde(default = "default_actor")]
    actor: String,
}

fn default_actor() -> String {
    "api".to_string()
}

fn default_reason() -> String {
    "manual".to_string()
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Conversation> {
    Ok(Json(load_conversation(&state, id).await?))
}

async fn assign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AssignBody>,
) -> ApiResult<Conversation> {
    state
        .assignment
        .assign(id, body.agent_id, &body.assigned_by)
        .await?;
    Ok(Json(load_conversation(&state, id).await?))
}

async fn release(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReleaseBody>,
) -> ApiResult<Conversation> {
    state
        .assignment
        .release(id, body.agent_id, &body.reason)
        .await?;
    Ok(Json(load_conversation(&state, id).await?))
}

async fn transfer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<TransferBody>,
) -> ApiResult<Conversation> {
    state
        .assignment
        .transfer(id, body.from_agent, body.to_agent, &body.reason)
        .await?;
    Ok(Json(load_conversation(&state, id).await?))
}

async fn resolve_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorBody>,
) -> ApiResult<Conversation> {
    let mut conversation = load_conversation(&state, id).await?;
    let previous = conversation.status;
    conversation.resolve(&body.actor, Utc::now())?;
    state.store.save_conversation(&conversation).await?;
    state.bus.publish(
        "conversation.resolved",
        serde_json::json!({
            "conversation": conversation,
            "previous_status": previous.as_str(),
            "actor": body.actor,
        }),
    );
    Ok(Json(conversation))
}

async fn close_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorBody>,
) -> ApiResult<Conversation> {
    let mut conversation = load_conversation(&state, id).await?;
    let previous = conversation.status;
    conversation.close(Utc::now())?;
    state.store.save_conversation(&conversation).await?;
    state.bus.publish(
        "conversation.closed",
        serde_json::json!({
            "conversation": conversation,
            "previous_status": previous.as_str(),
            "actor": body.actor,
        }),
    );
    Ok(Json(conversation))
}

async fn reopen_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorBody>,
) -> ApiResult<Conversation> {
    let mut conversation = load_conversation(&state, id).await?;
    let previous = conversation.status;
    conversation.reopen(Utc::now())?;
    state.store.save_conversation(&conversation).await?;
    state.bus.publish(
        "conversation.reopened",
        serde_json::json!({
            "conversation": conversation,
            "previous_status": previous.as_str(),
            "actor": body.actor,
        }),
    );
    Ok(Json(conversation))
}

/// Park the conversation while a customer reply is pending. The pipeline
/// resumes it automatically on the next inbound message.
async fn wait_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorBody>,
) -> ApiResult<Conversation> {
    let mut conversation = load_conversation(&state, id).await?;
    let previous = conversation.status;
    conversation.mark_waiting(Utc::now())?;
    state.store.save_conversation(&conversation).await?;
    state.bus.publish(
        "conversation.waiting",
        serde_json::json!({
            "conversation": conversation,
            "previous_status": previous.as_str(),
            "actor": body.actor,
        }),
    );
    Ok(Json(conversation))
}

/// Manual priority override, the single path that may lower priority.
async fn override_priority(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<PriorityBody>,
) -> ApiResult<Conversation> {
    let mut conversation = load_conversation(&state, id).await?;
    if conversation.override_priority(body.priority, &body.actor, Utc::now()) {
        state.store.save_conversation(&conversation).await?;
        state.bus.publish(
            "conversation.priority_changed",
            serde_json::json!({
                "conversation": conversation,
                "actor": body.actor,
            }),
        );
    }
    Ok(Json(conversation))
}

#[derive(Deserialize)]
struct CreateTicketBody {
    customer_id: Uuid,
    conversation_id: Option<Uuid>,
    subject: String,
    description: Option<String>,
    category: String,
    priority: Priority,
    #[serde(default = "default_actor")]
    created_by: String,
}

#[derive(Deserialize)]
struct TicketStatusBody {
    status: TicketStatus,
    #[serde(default = "default_actor")]
    changed_by: String,
    #[serde(default = "default_reason")]
    reason: String,
}

#[derive(Deserialize)]
struct NoteBody {
    author: String,
    content: String,
    #[serde(default)]
    internal: bool,
}

#[derive(Deserialize)]
struct ResolveTicketBody {
    #[serde(default = "default_actor")]
    changed_by: String,
    summary: String,
}

async fn create_ticket(
    State(state): State<AppState>,
    Json(body): Json<CreateTicketBody>,
) -> ApiResult<crate::schema::Ticket> {
    let ticket = state
        .tickets
        .create(crate::functions::tickets::NewTicket {
            customer_id: body.customer_id,
            conversation_id: body.conversation_id,
            subject: &body.subject,
            description: body.description.as_deref(),
            category: &body.category,
            priority: body.priority,
            created_by: &body.created_by,
        })
        .await?;
    Ok(Json(ticket))
}

/// Lookup by the human-facing number, e.g. `TKT-2026-00042`.
async fn get_ticket(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> ApiResult<crate::schema::Ticket> {
    let ticket = state
        .tickets
        .lookup(&number)
        .await?
        .ok_or_else(|| Error::not_found("ticket", &number))?;
    Ok(Json(ticket))
}

async fn ticket_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<TicketStatusBody>,
) -> ApiResult<crate::schema::Ticket> {
    let ticket = state
        .tickets
        .transition(id, body.status, &body.changed_by, &body.reason)
        .await?;
    Ok(Json(ticket))
}

async fn ticket_note(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<NoteBody>,
) -> ApiResult<crate::schema::Ticket> {
    let ticket = state
        .tickets
        .add_note(id, &body.author, &body.content, body.internal)
        .await?;
    Ok(Json(ticket))
}

async fn resolve_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ResolveTicketBody>,
) -> ApiResult<crate::schema::Ticket> {
    let ticket = state
        .tickets
        .resolve(id, &body.changed_by, &body.summary)
        .await?;
    Ok(Json(ticket))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", get(webhook::verify).post(webhook::receive))
        .route("/conversations/{id}", get(get_conversation))
        .route("/conversations/{id}/assign", post(assign))
        .route("/conversations/{id}/release", post(release))
        .route("/conversations/{id}/transfer", post(transfer))
        .route("/conversations/{id}/resolve", post(resolve_conversation))
        .route("/conversations/{id}/close", post(close_conversation))
        .route("/conversations/{id}/reopen", post(reopen_conversation))
        .route("/conversations/{id}/wait", post(wait_conversation))
        .route("/conversations/{id}/priority", post(override_priority))
        .route("/tickets", post(create_ticket))
        .route("/tickets/{number}", get(get_ticket))
        .route("/tickets/{id}/status", post(ticket_status))
        .route("/tickets/{id}/notes", post(ticket_note))
        .route("/tickets/{id}/resolve", post(resolve_ticket))
        .with_state(state)
}
