use crate::entities::dao::{Message, Role};
use crate::entities::{format_ts, parse_ts, SqliteStore};
use serde_json::Value;
use std::future::Future;

type MessageRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
);

fn encode_json(value: &Option<Value>) -> Option<String> {
    value.as_ref().map(Value::to_string)
}

fn decode_json(raw: Option<String>, field: &'static str) -> Option<Value> {
    let raw = raw?;
    match serde_json::from_str(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(field, error = %e, "dropping unreadable stored JSON");
            None
        }
    }
}

fn from_row(
    (id, conversation_id, role, content, retrieval, guardrails, functions, created_at): MessageRow,
) -> Message {
    let role = role.parse().unwrap_or_else(|e: String| {
        tracing::warn!(message_id = %id, error = %e, "unknown stored role; treating as assistant");
        Role::Assistant
    });
    Message {
        id,
        conversation_id,
        role,
        content,
        retrieval: decode_json(retrieval, "retrieval"),
        guardrails: decode_json(guardrails, "guardrails"),
        functions: decode_json(functions, "functions"),
        created_at: parse_ts(&created_at, "created_at"),
    }
}

pub trait MessageStore: Send + Sync + 'static {
    fn append_message(
        &self,
        message: Message,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    /// Oldest first; insertion order breaks timestamp ties.
    fn list_messages(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<Vec<Message>, sqlx::Error>> + Send;
}

impl MessageStore for SqliteStore {
    async fn append_message(&self, message: Message) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO messages \
             (id, conversation_id, role, content, retrieval, guardrails, functions, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(encode_json(&message.retrieval))
        .bind(encode_json(&message.guardrails))
        .bind(encode_json(&message.functions))
        .bind(format_ts(&message.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, sqlx::Error> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, conversation_id, role, content, retrieval, guardrails, functions, created_at \
             FROM messages WHERE conversation_id = ?1 \
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }
}
