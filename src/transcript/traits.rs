use crate::channels::{ChatId, UserProfile};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("transcript storage error: {0}")]
    Storage(String),
}

/// A chat participant as remembered by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: i64,
    pub chat_id: ChatId,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_interaction: DateTime<Utc>,
    /// If set, always references an existing conversation.
    pub current_conversation_id: Option<String>,
    pub selected_model: Option<String>,
}

/// One completed turn. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessagePair {
    pub user_text: String,
    pub bot_text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: i64,
    pub mode: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    /// Insertion order, which is chronological order.
    pub messages: Vec<MessagePair>,
}

/// Append-only transcript persistence. Implement for any storage backend.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Insert the user on first contact; afterwards refresh display fields and
    /// `last_interaction`.
    async fn create_user(
        &self,
        profile: &UserProfile,
        chat_id: ChatId,
    ) -> Result<UserRecord, TranscriptError>;

    async fn get_user(&self, user_id: i64) -> Result<Option<UserRecord>, TranscriptError>;

    /// Start a conversation and make it the user's current one, atomically.
    async fn create_conversation(
        &self,
        user_id: i64,
        mode: &str,
        model: &str,
    ) -> Result<String, TranscriptError>;

    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, TranscriptError>;

    /// Like [`Self::get_conversation`], with only the last `limit` pairs loaded.
    async fn get_recent_conversation(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Option<Conversation>, TranscriptError>;

    /// Fails with `NotFound` for an unknown conversation.
    async fn append_message(
        &self,
        conversation_id: &str,
        user_text: &str,
        bot_text: &str,
    ) -> Result<(), TranscriptError>;

    async fn set_selected_model(&self, user_id: i64, model: &str) -> Result<(), TranscriptError>;

    /// The user's chosen model, or the process-wide default.
    async fn get_selected_model(&self, user_id: i64) -> Result<String, TranscriptError>;

    async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<MessagePair>, TranscriptError> {
        self.get_conversation(conversation_id)
            .await?
            .map(|c| c.messages)
            .ok_or_else(|| TranscriptError::NotFound(format!("conversation {conversation_id}")))
    }

    /// The last `limit` pairs, oldest first.
    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<MessagePair>, TranscriptError> {
        self.get_recent_conversation(conversation_id, limit)
            .await?
            .map(|c| c.messages)
            .ok_or_else(|| TranscriptError::NotFound(format!("conversation {conversation_id}")))
    }

    /// Health check
    async fn health_check(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_error_display() {
        assert_eq!(
            TranscriptError::NotFound("conversation abc".into()).to_string(),
            "conversation abc not found"
        );
        assert!(
            TranscriptError::Storage("disk full".into())
                .to_string()
                .contains("disk full")
        );
    }
}
