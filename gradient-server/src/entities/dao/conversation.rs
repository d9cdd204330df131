use chrono::{DateTime, Utc};

/// Title shown for a conversation that has none yet.
pub const DEFAULT_TITLE: &str = "New chat";

/// Maximum length, in characters, of a title derived from a reply.
pub const DERIVED_TITLE_CHARS: usize = 60;

/// A row in the `conversations` table.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    /// `None` until renamed or derived from the first assistant reply.
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(DEFAULT_TITLE)
    }
}

/// First [`DERIVED_TITLE_CHARS`] characters of `reply`.
pub fn derive_title(reply: &str) -> String {
    reply.chars().take(DERIVED_TITLE_CHARS).collect()
}
