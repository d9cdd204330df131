//! Conversation operations shared by the HTTP routes.
//!
//! Every lookup is scoped to the calling user; a conversation owned by
//! someone else is reported exactly like a missing one.

use chrono::Utc;
use gradient_agent::{AgentEndpoint, AgentFlags, AgentMessage};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::entities::dao::conversation::derive_title;
use crate::entities::dao::{Conversation, Message};
use crate::entities::{ConversationStore, MessageStore, SqliteStore};
use crate::error::ServerError;
use crate::handlers::settings;
use crate::middleware::AuthUser;
use crate::schemas::conversation::{
    CreateConversationRequest, RenameConversationRequest, SendMessageRequest,
};
use crate::state::{AppState, Turn};

fn not_found(id: &str) -> ServerError {
    ServerError::NotFound(format!("conversation '{id}' not found"))
}

pub async fn owned(
    state: &AppState,
    user: &AuthUser,
    id: &str,
) -> Result<Conversation, ServerError> {
    state
        .store
        .get_conversation(id, &user.id)
        .await?
        .ok_or_else(|| not_found(id))
}

pub async fn create(
    state: &AppState,
    user: &AuthUser,
    req: CreateConversationRequest,
) -> Result<Conversation, ServerError> {
    req.validate()?;
    let now = Utc::now();
    let conversation = Conversation {
        id: Uuid::new_v4().to_string(),
        user_id: user.id.clone(),
        title: req
            .title
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty()),
        created_at: now,
        updated_at: now,
    };
    state.store.create_conversation(conversation.clone()).await?;
    info!(conversation_id = %conversation.id, "conversation created");
    Ok(conversation)
}

pub async fn list(state: &AppState, user: &AuthUser) -> Result<Vec<Conversation>, ServerError> {
    Ok(state.store.list_conversations(&user.id).await?)
}

pub async fn get(
    state: &AppState,
    user: &AuthUser,
    id: &str,
) -> Result<(Conversation, Vec<Message>), ServerError> {
    let conversation = owned(state, user, id).await?;
    let messages = state.store.list_messages(id).await?;
    Ok((conversation, messages))
}

pub async fn rename(
    state: &AppState,
    user: &AuthUser,
    id: &str,
    req: RenameConversationRequest,
) -> Result<Conversation, ServerError> {
    req.validate()?;
    if !state
        .store
        .rename_conversation(id, &user.id, req.title.trim())
        .await?
    {
        return Err(not_found(id));
    }
    owned(state, user, id).await
}

pub async fn delete(state: &AppState, user: &AuthUser, id: &str) -> Result<(), ServerError> {
    owned(state, user, id).await?;
    if state.turns.cancel(id) {
        info!(conversation_id = %id, "cancelled in-flight turn of deleted conversation");
    }
    if !state.store.delete_conversation(id, &user.id).await? {
        return Err(not_found(id));
    }
    info!(conversation_id = %id, "conversation deleted");
    Ok(())
}

/// Cancel the turn running on the conversation; 404 when none is running.
pub async fn cancel(state: &AppState, user: &AuthUser, id: &str) -> Result<(), ServerError> {
    owned(state, user, id).await?;
    if state.turns.cancel(id) {
        info!(conversation_id = %id, "turn cancellation requested");
        Ok(())
    } else {
        Err(ServerError::NotFound(format!(
            "no turn in flight on conversation '{id}'"
        )))
    }
}

// ── Turns ────────────────────────────────────────────────────────────────────

/// Everything needed to call the agent for one turn. Holding it keeps the
/// conversation registered as busy.
#[derive(Debug)]
pub struct PreparedTurn {
    pub turn: Turn,
    pub endpoint: AgentEndpoint,
    pub flags: AgentFlags,
    pub history: Vec<AgentMessage>,
}

/// Validate, register the turn, persist the user message, and resolve the
/// agent settings and history.
///
/// Validation and ownership are checked before anything is written. The user
/// message is persisted before settings are consulted, so it survives a
/// configuration or upstream failure.
pub async fn prepare_turn(
    state: &AppState,
    user: &AuthUser,
    id: &str,
    req: SendMessageRequest,
) -> Result<PreparedTurn, ServerError> {
    req.validate()?;
    owned(state, user, id).await?;
    let turn = state.turns.begin(id).ok_or_else(|| {
        ServerError::Conflict(format!("a reply is already in progress on conversation '{id}'"))
    })?;

    state.store.append_message(Message::user(id, req.content)).await?;

    let settings = settings::load(&*state.store, &state.config.agent_defaults).await?;
    let endpoint = settings.endpoint()?;
    let history = state
        .store
        .list_messages(id)
        .await?
        .into_iter()
        .map(|m| AgentMessage::new(m.role.as_str(), m.content))
        .collect();

    Ok(PreparedTurn {
        turn,
        endpoint,
        flags: settings.flags(),
        history,
    })
}

/// Persist an assistant reply, bump the conversation, and derive its title
/// when it has none.
pub async fn persist_reply(store: &SqliteStore, message: Message) -> Result<(), ServerError> {
    let conversation_id = message.conversation_id.clone();
    let title = (!message.content.is_empty()).then(|| derive_title(&message.content));
    let at = message.created_at;

    store.append_message(message).await?;
    store.touch_conversation(&conversation_id, at).await?;
    if let Some(title) = title {
        if store.set_title_if_missing(&conversation_id, &title).await? {
            info!(conversation_id = %conversation_id, "conversation title derived from reply");
        }
    }
    Ok(())
}

/// Buffered turn: one agent call, one assistant message.
pub async fn send(
    state: &AppState,
    user: &AuthUser,
    id: &str,
    req: SendMessageRequest,
) -> Result<Message, ServerError> {
    let prepared = prepare_turn(state, user, id, req).await?;
    let completion = state
        .agent
        .complete(&prepared.endpoint, &prepared.history, prepared.flags)
        .await
        .inspect_err(|e| warn!(conversation_id = %id, error = %e, "agent call failed"))?;

    let mut reply = Message::assistant(id, completion.content);
    reply.retrieval = completion.retrieval;
    reply.guardrails = completion.guardrails;
    reply.functions = completion.functions;

    persist_reply(&state.store, reply.clone()).await?;
    drop(prepared.turn);
    Ok(reply)
}
