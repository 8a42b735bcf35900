use super::traits::{
    CallbackQuery, ChatId, ChatKind, EditMessage, IncomingMessage, InlineButton, InlineKeyboard,
    MessageContent, MessageId, Messenger, PlatformError, SendMessage, TextFormat, Update,
    UserProfile,
};
use crate::config::TelegramConfig;
use crate::util::error_excerpt;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Content kinds checked, in order, when a message carries no text.
const NON_TEXT_KINDS: &[&str] = &[
    "photo",
    "document",
    "sticker",
    "animation",
    "voice",
    "video",
    "video_note",
    "audio",
    "poll",
    "location",
    "contact",
];

/// Telegram channel: long-polls the Bot API for updates
pub struct TelegramChannel {
    bot_token: String,
    allowed_users: Vec<String>,
    api_base: String,
    poll_timeout_secs: u64,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: String, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            api_base: DEFAULT_API_BASE.to_string(),
            poll_timeout_secs: 30,
            client: build_client(Duration::from_secs(45)),
        }
    }

    pub fn from_config(config: &TelegramConfig) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            allowed_users: config.allowed_users.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            poll_timeout_secs: config.poll_timeout_secs,
            client: build_client(Duration::from_secs(config.request_timeout_secs)),
        }
    }

    /// Point the channel at a different Bot API server (self-hosted or mock).
    #[must_use]
    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_poll_timeout(mut self, secs: u64) -> Self {
        self.poll_timeout_secs = secs;
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    fn is_user_allowed(&self, username: &str) -> bool {
        self.allowed_users.iter().any(|u| u == "*" || u == username)
    }

    fn is_any_user_allowed<'a, I>(&self, identities: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        identities.into_iter().any(|id| self.is_user_allowed(id))
    }

    fn is_profile_allowed(&self, profile: &UserProfile) -> bool {
        let id = profile.id.to_string();
        let mut identities = vec![id.as_str()];
        if let Some(username) = profile.username.as_deref() {
            identities.push(username);
        }
        self.is_any_user_allowed(identities)
    }

    /// POST a Bot API method and return its `result` payload.
    async fn call(&self, method: &str, body: Value) -> Result<Value, PlatformError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| PlatformError::Transport(format!("Telegram {method} failed: {e}")))?;

        let status = resp.status();
        let raw = resp
            .text()
            .await
            .map_err(|e| PlatformError::Transport(format!("Telegram {method} body: {e}")))?;

        let Ok(data) = serde_json::from_str::<Value>(&raw) else {
            return Err(PlatformError::Transport(format!(
                "Telegram {method} returned HTTP {status}: {}",
                error_excerpt(&raw)
            )));
        };

        if status.is_success() && data.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(data.get("result").cloned().unwrap_or(Value::Null));
        }

        let err = classify_error(status.as_u16(), &data);
        tracing::debug!(method, error = %err, "Telegram API call rejected");
        Err(err)
    }

    /// Convert a raw `getUpdates` entry, dropping unauthorized senders.
    fn accept_update(&self, raw: &Value) -> Option<Update> {
        let update = parse_update(raw)?;
        let from = match &update {
            Update::Message(m) => &m.from,
            Update::Callback(c) => &c.from,
        };
        if self.is_profile_allowed(from) {
            Some(update)
        } else {
            tracing::warn!(
                user_id = from.id,
                username = from.username.as_deref().unwrap_or("unknown"),
                "Telegram: ignoring update from unauthorized user. \
Allowlist the Telegram @username or numeric user ID in telegram.allowed_users."
            );
            None
        }
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn parse_mode(format: TextFormat) -> Option<&'static str> {
    match format {
        TextFormat::Plain => None,
        TextFormat::Html => Some("HTML"),
        TextFormat::Markdown => Some("Markdown"),
    }
}

/// Map a `{"ok": false, ...}` response onto a [`PlatformError`] variant.
pub fn classify_error(http_status: u16, body: &Value) -> PlatformError {
    let code = body
        .get("error_code")
        .and_then(Value::as_i64)
        .unwrap_or_else(|| i64::from(http_status));
    let description = body
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let retry_after = body
        .pointer("/parameters/retry_after")
        .and_then(Value::as_u64);

    if code == 429 || retry_after.is_some() {
        return PlatformError::RateLimited {
            retry_after: retry_after.unwrap_or(1),
        };
    }

    let lower = description.to_ascii_lowercase();
    if lower.contains("message is not modified") {
        PlatformError::NotModified
    } else if lower.contains("message is too long") || lower.contains("message_too_long") {
        PlatformError::MessageTooLong
    } else if lower.contains("can't parse entities") {
        PlatformError::MalformedMarkup(description)
    } else if lower.contains("message to edit not found")
        || lower.contains("message to delete not found")
    {
        PlatformError::NotFound
    } else {
        PlatformError::Rejected { code, description }
    }
}

// ── Update parsing ──────────────────────────────────────────────────

fn parse_user(v: &Value) -> Option<UserProfile> {
    Some(UserProfile {
        id: v.get("id")?.as_i64()?,
        username: v.get("username").and_then(Value::as_str).map(str::to_string),
        first_name: v
            .get("first_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        last_name: v.get("last_name").and_then(Value::as_str).map(str::to_string),
    })
}

fn parse_chat_kind(chat: &Value) -> ChatKind {
    match chat.get("type").and_then(Value::as_str) {
        Some("group" | "supergroup") => ChatKind::Group,
        Some("channel") => ChatKind::Channel,
        _ => ChatKind::Private,
    }
}

fn parse_content(message: &Value) -> MessageContent {
    if let Some(text) = message.get("text").and_then(Value::as_str) {
        if let Some(rest) = text.strip_prefix('/') {
            let (head, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let name = head.split('@').next().unwrap_or(head);
            if !name.is_empty() {
                return MessageContent::Command {
                    name: name.to_ascii_lowercase(),
                    args: args.trim().to_string(),
                };
            }
        }
        return MessageContent::Text(text.to_string());
    }

    let kind = NON_TEXT_KINDS
        .iter()
        .find(|k| message.get(**k).is_some())
        .copied()
        .unwrap_or("unknown");
    MessageContent::Other(kind.to_string())
}

fn parse_keyboard(markup: &Value) -> Option<InlineKeyboard> {
    let rows = markup.get("inline_keyboard")?.as_array()?;
    let rows = rows
        .iter()
        .map(|row| {
            row.as_array()
                .map(|buttons| {
                    buttons
                        .iter()
                        .filter_map(|b| {
                            Some(InlineButton::new(
                                b.get("text")?.as_str()?,
                                b.get("callback_data")?.as_str()?,
                            ))
                        })
                        .collect()
                })
                .unwrap_or_default()
        })
        .collect();
    Some(InlineKeyboard::new(rows))
}

/// Convert one `getUpdates` entry. Unsupported update kinds yield `None`.
pub fn parse_update(raw: &Value) -> Option<Update> {
    if let Some(message) = raw.get("message") {
        let chat = message.get("chat")?;
        return Some(Update::Message(IncomingMessage {
            chat_id: chat.get("id")?.as_i64()?,
            chat_kind: parse_chat_kind(chat),
            message_id: message.get("message_id")?.as_i64()?,
            from: parse_user(message.get("from")?)?,
            content: parse_content(message),
        }));
    }

    if let Some(callback) = raw.get("callback_query") {
        let message = callback.get("message")?;
        return Some(Update::Callback(CallbackQuery {
            id: callback.get("id")?.as_str()?.to_string(),
            from: parse_user(callback.get("from")?)?,
            chat_id: message.get("chat")?.get("id")?.as_i64()?,
            message_id: message.get("message_id")?.as_i64()?,
            data: callback
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            message_text: message.get("text").and_then(Value::as_str).map(str::to_string),
            keyboard: message.get("reply_markup").and_then(parse_keyboard),
        }));
    }

    None
}

fn message_body(chat_id: ChatId, text: &str, format: TextFormat) -> Value {
    let mut body = serde_json::json!({
        "chat_id": chat_id,
        "text": text,
    });
    if let Some(mode) = parse_mode(format) {
        body["parse_mode"] = Value::from(mode);
    }
    body
}

#[async_trait]
impl Messenger for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: SendMessage) -> Result<MessageId, PlatformError> {
        let mut body = message_body(message.chat_id, &message.text, message.format);
        if let Some(keyboard) = &message.keyboard {
            body["reply_markup"] = serde_json::to_value(keyboard)
                .map_err(|e| PlatformError::Transport(e.to_string()))?;
        }

        let result = self.call("sendMessage", body).await?;
        result
            .get("message_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| PlatformError::Transport("sendMessage result without message_id".into()))
    }

    async fn edit(&self, edit: EditMessage) -> Result<(), PlatformError> {
        let mut body = message_body(edit.chat_id, &edit.text, edit.format);
        body["message_id"] = Value::from(edit.message_id);
        if let Some(keyboard) = &edit.keyboard {
            body["reply_markup"] = serde_json::to_value(keyboard)
                .map_err(|e| PlatformError::Transport(e.to_string()))?;
        }
        self.call("editMessageText", body).await.map(|_| ())
    }

    async fn clear_keyboard(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), PlatformError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
        });
        self.call("editMessageReplyMarkup", body).await.map(|_| ())
    }

    async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), PlatformError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
        });
        self.call("deleteMessage", body).await.map(|_| ())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), PlatformError> {
        let mut body = serde_json::json!({
            "callback_query_id": callback_id,
            "show_alert": show_alert,
        });
        if let Some(text) = text {
            body["text"] = Value::from(text);
        }
        self.call("answerCallbackQuery", body).await.map(|_| ())
    }

    async fn listen(&self, tx: mpsc::Sender<Update>) -> anyhow::Result<()> {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for updates...");

        loop {
            let body = serde_json::json!({
                "offset": offset,
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message", "callback_query"]
            });

            let results = match self.call("getUpdates", body).await {
                Ok(r) => r,
                Err(PlatformError::RateLimited { retry_after }) => {
                    tracing::warn!(retry_after, "Telegram poll rate limited");
                    tokio::time::sleep(Duration::from_secs(retry_after)).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Telegram poll error: {e}");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            let Some(updates) = results.as_array() else {
                continue;
            };

            for raw in updates {
                // Advance offset past this update
                if let Some(uid) = raw.get("update_id").and_then(Value::as_i64) {
                    offset = uid + 1;
                }

                let Some(update) = self.accept_update(raw) else {
                    continue;
                };

                if tx.send(update).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.call("getMe", serde_json::json!({})).await.is_ok()
    }
}
