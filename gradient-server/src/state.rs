//! Shared application state injected into every Axum handler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use gradient_agent::AgentClient;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::entities::SqliteStore;

/// Tracks the cancellation token of every in-flight turn, keyed by
/// conversation id. At most one turn per conversation is registered.
#[derive(Default)]
pub struct TurnRegistry {
    turns: Mutex<HashMap<String, CancellationToken>>,
}

impl std::fmt::Debug for TurnRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.turns.lock().map(|t| t.len()).unwrap_or(0);
        write!(f, "TurnRegistry({count} turns)")
    }
}

impl TurnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a turn on `conversation_id`. Returns `None` when another turn
    /// already holds the conversation.
    ///
    /// The returned [`Turn`] deregisters itself when dropped.
    pub fn begin(self: &Arc<Self>, conversation_id: &str) -> Option<Turn> {
        let mut turns = self.turns.lock().ok()?;
        if turns.contains_key(conversation_id) {
            return None;
        }
        let token = CancellationToken::new();
        turns.insert(conversation_id.to_owned(), token.clone());
        Some(Turn {
            conversation_id: conversation_id.to_owned(),
            token,
            registry: Arc::clone(self),
        })
    }

    /// Cancel the turn running on `conversation_id`. Returns `true` if one was found.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        if let Ok(turns) = self.turns.lock() {
            if let Some(token) = turns.get(conversation_id) {
                token.cancel();
                return true;
            }
        }
        false
    }

    #[cfg(test)]
    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.turns
            .lock()
            .map(|t| t.contains_key(conversation_id))
            .unwrap_or(false)
    }

    fn remove(&self, conversation_id: &str) {
        if let Ok(mut turns) = self.turns.lock() {
            turns.remove(conversation_id);
        }
    }
}

/// Registration of one in-flight turn.
#[derive(Debug)]
pub struct Turn {
    conversation_id: String,
    token: CancellationToken,
    registry: Arc<TurnRegistry>,
}

impl Turn {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        self.registry.remove(&self.conversation_id);
    }
}

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Conversations, messages and settings.
    pub store: Arc<SqliteStore>,
    /// Shared HTTP client for the agent endpoint.
    pub agent: AgentClient,
    /// In-flight turns.
    pub turns: Arc<TurnRegistry>,
}

impl AppState {
    pub fn new(config: Config, store: SqliteStore) -> Self {
        let agent = AgentClient::new(config.agent_timeout);
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            agent,
            turns: Arc::new(TurnRegistry::new()),
        }
    }
}
