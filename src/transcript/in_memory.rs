use super::traits::{Conversation, MessagePair, TranscriptError, TranscriptStore, UserRecord};
use crate::channels::{ChatId, UserProfile};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct State {
    users: HashMap<i64, UserRecord>,
    conversations: HashMap<String, Conversation>,
}

/// Process-local transcript store. Nothing survives a restart.
pub struct InMemoryTranscriptStore {
    state: Mutex<State>,
    default_model: String,
}

impl InMemoryTranscriptStore {
    pub fn new(default_model: &str) -> Self {
        Self {
            state: Mutex::new(State::default()),
            default_model: default_model.to_string(),
        }
    }
}

#[async_trait]
impl TranscriptStore for InMemoryTranscriptStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_user(
        &self,
        profile: &UserProfile,
        chat_id: ChatId,
    ) -> Result<UserRecord, TranscriptError> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let record = state
            .users
            .entry(profile.id)
            .and_modify(|u| {
                u.chat_id = chat_id;
                u.username.clone_from(&profile.username);
                u.first_name.clone_from(&profile.first_name);
                u.last_name.clone_from(&profile.last_name);
                u.last_interaction = now;
            })
            .or_insert_with(|| UserRecord {
                id: profile.id,
                chat_id,
                username: profile.username.clone(),
                first_name: profile.first_name.clone(),
                last_name: profile.last_name.clone(),
                first_seen: now,
                last_interaction: now,
                current_conversation_id: None,
                selected_model: None,
            });
        Ok(record.clone())
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<UserRecord>, TranscriptError> {
        Ok(self.state.lock().users.get(&user_id).cloned())
    }

    async fn create_conversation(
        &self,
        user_id: i64,
        mode: &str,
        model: &str,
    ) -> Result<String, TranscriptError> {
        let mut state = self.state.lock();
        if !state.users.contains_key(&user_id) {
            return Err(TranscriptError::NotFound(format!("user {user_id}")));
        }

        let id = Uuid::new_v4().to_string();
        state.conversations.insert(
            id.clone(),
            Conversation {
                id: id.clone(),
                user_id,
                mode: mode.to_string(),
                model: model.to_string(),
                started_at: Utc::now(),
                messages: Vec::new(),
            },
        );
        if let Some(user) = state.users.get_mut(&user_id) {
            user.current_conversation_id = Some(id.clone());
        }
        Ok(id)
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, TranscriptError> {
        Ok(self.state.lock().conversations.get(conversation_id).cloned())
    }

    async fn get_recent_conversation(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Option<Conversation>, TranscriptError> {
        let state = self.state.lock();
        Ok(state.conversations.get(conversation_id).map(|c| {
            let skip = c.messages.len().saturating_sub(limit);
            Conversation {
                id: c.id.clone(),
                user_id: c.user_id,
                mode: c.mode.clone(),
                model: c.model.clone(),
                started_at: c.started_at,
                messages: c.messages[skip..].to_vec(),
            }
        }))
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        user_text: &str,
        bot_text: &str,
    ) -> Result<(), TranscriptError> {
        let mut state = self.state.lock();
        let conversation = state
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| TranscriptError::NotFound(format!("conversation {conversation_id}")))?;
        conversation.messages.push(MessagePair {
            user_text: user_text.to_string(),
            bot_text: bot_text.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn set_selected_model(&self, user_id: i64, model: &str) -> Result<(), TranscriptError> {
        let mut state = self.state.lock();
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| TranscriptError::NotFound(format!("user {user_id}")))?;
        user.selected_model = Some(model.to_string());
        Ok(())
    }

    async fn get_selected_model(&self, user_id: i64) -> Result<String, TranscriptError> {
        Ok(self
            .state
            .lock()
            .users
            .get(&user_id)
            .and_then(|u| u.selected_model.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.default_model.clone()))
    }

    async fn health_check(&self) -> bool {
        true
    }
}
