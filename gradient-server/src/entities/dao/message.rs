use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// A row in the `messages` table. Never updated once inserted.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    /// Opaque side-channel payloads copied from the agent reply.
    pub retrieval: Option<Value>,
    pub guardrails: Option<Value>,
    pub functions: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(conversation_id: &str, content: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::User, content.into())
    }

    pub fn assistant(conversation_id: &str, content: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::Assistant, content.into())
    }

    fn new(conversation_id: &str, role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_owned(),
            role,
            content,
            retrieval: None,
            guardrails: None,
            functions: None,
            created_at: Utc::now(),
        }
    }
}
