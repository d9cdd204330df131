use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use validator::Validate;

use crate::entities::dao::{Conversation, Message, Role};

#[derive(Debug, Clone, Default, Deserialize, ToSchema, Validate)]
pub struct CreateConversationRequest {
    /// Optional initial title; blank titles are treated as absent.
    #[validate(length(max = 200))]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct RenameConversationRequest {
    #[validate(custom(function = "crate::schemas::non_blank"), length(max = 200))]
    pub title: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct SendMessageRequest {
    #[validate(custom(function = "crate::schemas::non_blank"))]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConversationResponse {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MessageResponse {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub retrieval: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub guardrails: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub functions: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// A conversation together with its messages in creation order.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConversationDetailResponse {
    #[serde(flatten)]
    pub conversation: ConversationResponse,
    pub messages: Vec<MessageResponse>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CancelResponse {
    pub conversation_id: String,
    pub cancelled: bool,
}

impl Conversation {
    pub fn to_response(&self) -> ConversationResponse {
        ConversationResponse {
            id: self.id.clone(),
            title: self.display_title().to_owned(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl From<Message> for MessageResponse {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            conversation_id: m.conversation_id,
            role: m.role,
            content: m.content,
            retrieval: m.retrieval,
            guardrails: m.guardrails,
            functions: m.functions,
            created_at: m.created_at,
        }
    }
}
