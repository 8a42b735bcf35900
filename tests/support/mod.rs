//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use llamarelay::channels::{
    ChatId, EditMessage, MessageId, Messenger, PlatformError, SendMessage, Update, UserProfile,
};
use llamarelay::providers::{ChatRequest, Fragment, FragmentStream, GenerationError, Provider};
use llamarelay::transcript::{
    Conversation, InMemoryTranscriptStore, MessagePair, TranscriptError, TranscriptStore,
    UserRecord,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn profile(id: i64, first_name: &str) -> UserProfile {
    UserProfile {
        id,
        username: Some(first_name.to_lowercase()),
        first_name: first_name.to_string(),
        last_name: None,
    }
}

// ── Messenger ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Send(SendMessage),
    Edit(EditMessage),
    ClearKeyboard {
        chat_id: ChatId,
        message_id: MessageId,
    },
    Delete {
        chat_id: ChatId,
        message_id: MessageId,
    },
    Answer {
        callback_id: String,
        text: Option<String>,
        show_alert: bool,
    },
}

/// Records every platform call; edit results can be scripted.
pub struct RecordingMessenger {
    calls: Mutex<Vec<Call>>,
    next_message_id: AtomicI64,
    edit_script: Mutex<VecDeque<Result<(), PlatformError>>>,
    max_len: Option<usize>,
    shown: Mutex<BTreeMap<MessageId, String>>,
}

impl Default for RecordingMessenger {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_message_id: AtomicI64::new(100),
            edit_script: Mutex::new(VecDeque::new()),
            max_len: None,
            shown: Mutex::new(BTreeMap::new()),
        }
    }
}

impl RecordingMessenger {
    /// Rejects sends and edits longer than `max_len` UTF-16 units, like Telegram.
    pub fn with_length_limit(max_len: usize) -> Self {
        Self {
            max_len: Some(max_len),
            ..Self::default()
        }
    }

    fn too_long(&self, text: &str) -> bool {
        self.max_len
            .is_some_and(|max| text.encode_utf16().count() > max)
    }

    /// Current text of every message sent so far, by id.
    pub fn shown(&self) -> BTreeMap<MessageId, String> {
        self.shown.lock().clone()
    }

    pub fn script_edits(&self, results: Vec<Result<(), PlatformError>>) {
        self.edit_script.lock().extend(results);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn sends(&self) -> Vec<SendMessage> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<EditMessage> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Edit(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sends().into_iter().map(|m| m.text).collect()
    }

    pub fn answers(&self) -> Vec<(Option<String>, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Answer {
                    text, show_alert, ..
                } => Some((text, show_alert)),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Delete { .. }))
            .count()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: SendMessage) -> Result<MessageId, PlatformError> {
        self.calls.lock().push(Call::Send(message.clone()));
        if self.too_long(&message.text) {
            return Err(PlatformError::MessageTooLong);
        }
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        self.shown.lock().insert(id, message.text);
        Ok(id)
    }

    async fn edit(&self, edit: EditMessage) -> Result<(), PlatformError> {
        self.calls.lock().push(Call::Edit(edit.clone()));
        if self.too_long(&edit.text) {
            return Err(PlatformError::MessageTooLong);
        }
        let result = self.edit_script.lock().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.shown.lock().insert(edit.message_id, edit.text);
        }
        result
    }

    async fn clear_keyboard(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), PlatformError> {
        self.calls.lock().push(Call::ClearKeyboard {
            chat_id,
            message_id,
        });
        Ok(())
    }

    async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), PlatformError> {
        self.calls.lock().push(Call::Delete {
            chat_id,
            message_id,
        });
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), PlatformError> {
        self.calls.lock().push(Call::Answer {
            callback_id: callback_id.to_string(),
            text: text.map(str::to_string),
            show_alert,
        });
        Ok(())
    }

    async fn listen(&self, _tx: mpsc::Sender<Update>) -> anyhow::Result<()> {
        Ok(())
    }
}

// ── Provider ────────────────────────────────────────────────────

/// How one scripted generation behaves.
pub enum Script {
    /// Yield these items, `gap` apart, then end.
    Items {
        items: Vec<Result<Fragment, GenerationError>>,
        gap: Duration,
    },
    /// Yield these items, then never produce another one.
    Stall(Vec<Result<Fragment, GenerationError>>),
    /// Fail before any fragment.
    Refuse(GenerationError),
}

pub fn tokens(parts: &[&str]) -> Vec<Result<Fragment, GenerationError>> {
    let mut items: Vec<_> = parts
        .iter()
        .map(|p| {
            Ok(Fragment::Token {
                role: "assistant".into(),
                content: (*p).to_string(),
            })
        })
        .collect();
    items.push(Ok(Fragment::Done));
    items
}

pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
    models: Vec<String>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
            models: vec!["llama3.2".into(), "mistral".into()],
        }
    }

    pub fn replying(parts: &[&str]) -> Self {
        Self::new(vec![Script::Items {
            items: tokens(parts),
            gap: Duration::ZERO,
        }])
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<FragmentStream, GenerationError> {
        self.requests.lock().push(request);
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(Script::Items {
                items: tokens(&[]),
                gap: Duration::ZERO,
            });
        match script {
            Script::Refuse(e) => Err(e),
            Script::Items { items, gap } => Ok(stream::iter(items)
                .then(move |item| async move {
                    if !gap.is_zero() {
                        tokio::time::sleep(gap).await;
                    }
                    item
                })
                .boxed()),
            Script::Stall(items) => Ok(stream::iter(items).chain(stream::pending()).boxed()),
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        Ok(self.models.clone())
    }
}

// ── Transcript store ────────────────────────────────────────────

/// In-memory store whose appends can be made to fail.
pub struct FlakyStore {
    inner: InMemoryTranscriptStore,
    fail_appends: AtomicBool,
    appends: AtomicUsize,
    recent_loads: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryTranscriptStore::new("llama3.2"),
            fail_appends: AtomicBool::new(false),
            appends: AtomicUsize::new(0),
            recent_loads: AtomicUsize::new(0),
        }
    }

    pub fn failing_appends() -> Self {
        let store = Self::new();
        store.fail_appends.store(true, Ordering::SeqCst);
        store
    }

    /// Conversation loads that fetched only the recent tail.
    pub fn recent_loads(&self) -> usize {
        self.recent_loads.load(Ordering::SeqCst)
    }

    /// Successful appends so far.
    pub fn appends(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn create_user(
        &self,
        profile: &UserProfile,
        chat_id: ChatId,
    ) -> Result<UserRecord, TranscriptError> {
        self.inner.create_user(profile, chat_id).await
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<UserRecord>, TranscriptError> {
        self.inner.get_user(user_id).await
    }

    async fn create_conversation(
        &self,
        user_id: i64,
        mode: &str,
        model: &str,
    ) -> Result<String, TranscriptError> {
        self.inner.create_conversation(user_id, mode, model).await
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, TranscriptError> {
        self.inner.get_conversation(conversation_id).await
    }

    async fn get_recent_conversation(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Option<Conversation>, TranscriptError> {
        self.recent_loads.fetch_add(1, Ordering::SeqCst);
        self.inner
            .get_recent_conversation(conversation_id, limit)
            .await
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        user_text: &str,
        bot_text: &str,
    ) -> Result<(), TranscriptError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(TranscriptError::Storage("disk full".into()));
        }
        self.inner
            .append_message(conversation_id, user_text, bot_text)
            .await?;
        self.appends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_selected_model(&self, user_id: i64, model: &str) -> Result<(), TranscriptError> {
        self.inner.set_selected_model(user_id, model).await
    }

    async fn get_selected_model(&self, user_id: i64) -> Result<String, TranscriptError> {
        self.inner.get_selected_model(user_id).await
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<MessagePair>, TranscriptError> {
        self.inner.list_messages(conversation_id).await
    }

    async fn health_check(&self) -> bool {
        true
    }
}
