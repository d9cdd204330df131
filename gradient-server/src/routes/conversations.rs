//! Conversation endpoints. Every route requires a caller bearer token.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{KeepAliveStream, Sse};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use utoipa::OpenApi;

use crate::entities::dao::Role;
use crate::error::ServerError;
use crate::handlers::conversation as service;
use crate::handlers::relay::{self, TurnEvents};
use crate::middleware::{auth, AuthUser};
use crate::schemas::conversation::{
    CancelResponse, ConversationDetailResponse, ConversationResponse, CreateConversationRequest,
    MessageResponse, RenameConversationRequest, SendMessageRequest,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        create_conversation,
        list_conversations,
        get_conversation,
        rename_conversation,
        delete_conversation,
        send_message,
        stream_message,
        cancel_turn,
    ),
    components(schemas(
        CreateConversationRequest,
        RenameConversationRequest,
        SendMessageRequest,
        ConversationResponse,
        ConversationDetailResponse,
        MessageResponse,
        CancelResponse,
        Role,
    ))
)]
pub struct ConversationApi;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/conversations", post(create_conversation).get(list_conversations))
        .route(
            "/conversations/{id}",
            get(get_conversation)
                .patch(rename_conversation)
                .delete(delete_conversation),
        )
        .route("/conversations/{id}/messages", post(send_message))
        .route("/conversations/{id}/messages/stream", post(stream_message))
        .route("/conversations/{id}/cancel", post(cancel_turn))
        .route_layer(middleware::from_fn_with_state(state, auth::require_user))
}

// ── Conversation handlers ────────────────────────────────────────────────────

#[utoipa::path(
    post,
    path = "/conversations",
    tag = "conversations",
    request_body = CreateConversationRequest,
    responses(
        (status = 201, description = "Conversation created", body = ConversationResponse),
        (status = 401, description = "Missing or invalid bearer token"),
    )
)]
pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    body: Option<Json<CreateConversationRequest>>,
) -> Result<(StatusCode, Json<ConversationResponse>), ServerError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let conversation = service::create(&state, &user, req).await?;
    Ok((StatusCode::CREATED, Json(conversation.to_response())))
}

#[utoipa::path(
    get,
    path = "/conversations",
    tag = "conversations",
    responses(
        (status = 200, description = "Caller's conversations, most recently updated first", body = Vec<ConversationResponse>),
        (status = 401, description = "Missing or invalid bearer token"),
    )
)]
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<ConversationResponse>>, ServerError> {
    let conversations = service::list(&state, &user).await?;
    Ok(Json(conversations.iter().map(|c| c.to_response()).collect()))
}

#[utoipa::path(
    get,
    path = "/conversations/{id}",
    tag = "conversations",
    params(("id" = String, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Conversation with its messages", body = ConversationDetailResponse),
        (status = 404, description = "Conversation not found"),
    )
)]
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ConversationDetailResponse>, ServerError> {
    let (conversation, messages) = service::get(&state, &user, &id).await?;
    Ok(Json(ConversationDetailResponse {
        conversation: conversation.to_response(),
        messages: messages.into_iter().map(MessageResponse::from).collect(),
    }))
}

#[utoipa::path(
    patch,
    path = "/conversations/{id}",
    tag = "conversations",
    params(("id" = String, Path, description = "Conversation id")),
    request_body = RenameConversationRequest,
    responses(
        (status = 200, description = "Conversation renamed", body = ConversationResponse),
        (status = 400, description = "Blank title"),
        (status = 404, description = "Conversation not found"),
    )
)]
pub async fn rename_conversation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<RenameConversationRequest>,
) -> Result<Json<ConversationResponse>, ServerError> {
    let conversation = service::rename(&state, &user, &id, req).await?;
    Ok(Json(conversation.to_response()))
}

#[utoipa::path(
    delete,
    path = "/conversations/{id}",
    tag = "conversations",
    params(("id" = String, Path, description = "Conversation id")),
    responses(
        (status = 204, description = "Conversation and its messages deleted"),
        (status = 404, description = "Conversation not found"),
    )
)]
pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ServerError> {
    service::delete(&state, &user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Turn handlers ────────────────────────────────────────────────────────────

#[utoipa::path(
    post,
    path = "/conversations/{id}/messages",
    tag = "conversations",
    params(("id" = String, Path, description = "Conversation id")),
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Assistant reply", body = MessageResponse),
        (status = 400, description = "Blank content or agent not configured"),
        (status = 404, description = "Conversation not found"),
        (status = 409, description = "Another reply is in progress"),
        (status = 502, description = "Agent returned an error"),
        (status = 503, description = "Agent unreachable"),
    )
)]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<MessageResponse>, ServerError> {
    let reply = service::send(&state, &user, &id, req).await?;
    Ok(Json(reply.into()))
}

/// Streamed reply as server-sent events.
///
/// Each text fragment arrives as one `data:` frame. A successful turn ends
/// with `data: [DONE]`; a failure once streaming has begun ends with an
/// `error` event instead.
#[utoipa::path(
    post,
    path = "/conversations/{id}/messages/stream",
    tag = "conversations",
    params(("id" = String, Path, description = "Conversation id")),
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Event stream of reply fragments", content_type = "text/event-stream", body = String),
        (status = 400, description = "Blank content or agent not configured"),
        (status = 404, description = "Conversation not found"),
        (status = 409, description = "Another reply is in progress"),
        (status = 502, description = "Agent returned an error"),
        (status = 503, description = "Agent unreachable"),
    )
)]
pub async fn stream_message(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Sse<KeepAliveStream<TurnEvents>>, ServerError> {
    let prepared = service::prepare_turn(&state, &user, &id, req).await?;
    relay::start(&state, prepared).await
}

#[utoipa::path(
    post,
    path = "/conversations/{id}/cancel",
    tag = "conversations",
    params(("id" = String, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Cancellation requested", body = CancelResponse),
        (status = 404, description = "Conversation not found or idle"),
    )
)]
pub async fn cancel_turn(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ServerError> {
    service::cancel(&state, &user, &id).await?;
    Ok(Json(CancelResponse {
        conversation_id: id,
        cancelled: true,
    }))
}
