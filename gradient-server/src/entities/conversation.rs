use crate::entities::dao::Conversation;
use crate::entities::{format_ts, parse_ts, SqliteStore};
use chrono::{DateTime, Utc};
use std::future::Future;

type ConversationRow = (String, String, Option<String>, String, String);

fn from_row((id, user_id, title, created_at, updated_at): ConversationRow) -> Conversation {
    Conversation {
        id,
        user_id,
        title,
        created_at: parse_ts(&created_at, "created_at"),
        updated_at: parse_ts(&updated_at, "updated_at"),
    }
}

pub trait ConversationStore: Send + Sync + 'static {
    fn create_conversation(
        &self,
        conversation: Conversation,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    /// Returns `None` when the conversation is missing or owned by someone else.
    fn get_conversation(
        &self,
        id: &str,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<Conversation>, sqlx::Error>> + Send;

    /// Most recently updated first.
    fn list_conversations(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<Conversation>, sqlx::Error>> + Send;

    fn rename_conversation(
        &self,
        id: &str,
        user_id: &str,
        title: &str,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    fn touch_conversation(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    /// Sets the title only while it is still unset. Returns whether it changed.
    fn set_title_if_missing(
        &self,
        id: &str,
        title: &str,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    /// Deletes the conversation's messages, then the conversation itself.
    fn delete_conversation(
        &self,
        id: &str,
        user_id: &str,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;
}

impl ConversationStore for SqliteStore {
    async fn create_conversation(&self, conversation: Conversation) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO conversations (id, user_id, title, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&conversation.id)
        .bind(&conversation.user_id)
        .bind(&conversation.title)
        .bind(format_ts(&conversation.created_at))
        .bind(format_ts(&conversation.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_conversation(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Option<Conversation>, sqlx::Error> {
        let row: Option<ConversationRow> = sqlx::query_as(
            "SELECT id, user_id, title, created_at, updated_at \
             FROM conversations WHERE id = ?1 AND user_id = ?2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(from_row))
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, sqlx::Error> {
        let rows: Vec<ConversationRow> = sqlx::query_as(
            "SELECT id, user_id, title, created_at, updated_at \
             FROM conversations WHERE user_id = ?1 \
             ORDER BY updated_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn rename_conversation(
        &self,
        id: &str,
        user_id: &str,
        title: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE conversations SET title = ?1, updated_at = ?2 \
             WHERE id = ?3 AND user_id = ?4",
        )
        .bind(title)
        .bind(format_ts(&Utc::now()))
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_conversation(&self, id: &str, at: DateTime<Utc>) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE conversations SET updated_at = ?1 WHERE id = ?2")
            .bind(format_ts(&at))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_title_if_missing(&self, id: &str, title: &str) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE conversations SET title = ?1 WHERE id = ?2 AND title IS NULL")
                .bind(title)
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_conversation(&self, id: &str, user_id: &str) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let owned: Option<(String,)> =
            sqlx::query_as("SELECT id FROM conversations WHERE id = ?1 AND user_id = ?2")
                .bind(id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        if owned.is_none() {
            return Ok(false);
        }

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM conversations WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}
