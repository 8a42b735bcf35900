use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

pub type ChatId = i64;
pub type MessageId = i64;

// ── Error type ──────────────────────────────────────────────────────

/// Rejections from the messaging platform, classified once at the edge so
/// callers branch on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },
    /// Content and markup are already what was requested.
    #[error("message is not modified")]
    NotModified,
    #[error("malformed markup: {0}")]
    MalformedMarkup(String),
    /// Text exceeds the platform's per-message length limit.
    #[error("message is too long")]
    MessageTooLong,
    #[error("message not found")]
    NotFound,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("platform rejected request ({code}): {description}")]
    Rejected { code: i64, description: String },
}

// ── Outbound ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextFormat {
    #[default]
    Plain,
    Html,
    Markdown,
}

impl TextFormat {
    /// Parse a catalog `rendering_format`; anything unrecognized renders as plain text.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "html" => Self::Html,
            "markdown" | "md" => Self::Markdown,
            _ => Self::Plain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct InlineKeyboard {
    #[serde(rename = "inline_keyboard")]
    pub rows: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    pub fn new(rows: Vec<Vec<InlineButton>>) -> Self {
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendMessage {
    pub chat_id: ChatId,
    pub text: String,
    pub format: TextFormat,
    pub keyboard: Option<InlineKeyboard>,
}

impl SendMessage {
    pub fn new(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            format: TextFormat::Plain,
            keyboard: None,
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: TextFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_keyboard(mut self, keyboard: InlineKeyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub text: String,
    pub format: TextFormat,
    /// `None` removes any keyboard attached to the message.
    pub keyboard: Option<InlineKeyboard>,
}

// ── Inbound ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserProfile {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
}

impl UserProfile {
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {last}", self.first_name),
            _ => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Channel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    /// `/name args`, with any `@botname` suffix stripped.
    Command { name: String, args: String },
    /// Anything that is not text: "photo", "voice", "document", ...
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat_id: ChatId,
    pub chat_kind: ChatKind,
    pub message_id: MessageId,
    pub from: UserProfile,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackQuery {
    pub id: String,
    pub from: UserProfile,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub data: String,
    /// Text currently shown on the message the button belongs to.
    pub message_text: Option<String>,
    pub keyboard: Option<InlineKeyboard>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Message(IncomingMessage),
    Callback(CallbackQuery),
}

/// Narrow contract the relay and menus consume from a chat platform.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Human-readable channel name
    fn name(&self) -> &str;

    async fn send(&self, message: SendMessage) -> Result<MessageId, PlatformError>;

    async fn edit(&self, edit: EditMessage) -> Result<(), PlatformError>;

    async fn clear_keyboard(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), PlatformError>;

    async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), PlatformError>;

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), PlatformError>;

    /// Start listening for incoming updates (long-running)
    async fn listen(&self, tx: mpsc::Sender<Update>) -> anyhow::Result<()>;

    /// Check if channel is healthy
    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_format_parses_catalog_values() {
        assert_eq!(TextFormat::parse("html"), TextFormat::Html);
        assert_eq!(TextFormat::parse("HTML"), TextFormat::Html);
        assert_eq!(TextFormat::parse("markdown"), TextFormat::Markdown);
        assert_eq!(TextFormat::parse("md"), TextFormat::Markdown);
        assert_eq!(TextFormat::parse("text"), TextFormat::Plain);
        assert_eq!(TextFormat::parse(""), TextFormat::Plain);
    }

    #[test]
    fn keyboard_serializes_as_reply_markup() {
        let kb = InlineKeyboard::new(vec![vec![InlineButton::new("Next", "page:1")]]);
        let json = serde_json::to_value(&kb).unwrap();
        assert_eq!(json["inline_keyboard"][0][0]["text"], "Next");
        assert_eq!(json["inline_keyboard"][0][0]["callback_data"], "page:1");
    }

    #[test]
    fn empty_keyboard_detection() {
        assert!(InlineKeyboard::default().is_empty());
        assert!(InlineKeyboard::new(vec![vec![]]).is_empty());
        assert!(!InlineKeyboard::new(vec![vec![InlineButton::new("a", "b")]]).is_empty());
    }

    #[test]
    fn full_name_joins_last_name_when_present() {
        let mut user = UserProfile {
            id: 1,
            first_name: "Ada".into(),
            ..UserProfile::default()
        };
        assert_eq!(user.full_name(), "Ada");
        user.last_name = Some("Lovelace".into());
        assert_eq!(user.full_name(), "Ada Lovelace");
        user.last_name = Some(String::new());
        assert_eq!(user.full_name(), "Ada");
    }

    #[test]
    fn send_message_builder_sets_fields() {
        let msg = SendMessage::new(7, "hi")
            .with_format(TextFormat::Html)
            .with_keyboard(InlineKeyboard::default());
        assert_eq!(msg.chat_id, 7);
        assert_eq!(msg.format, TextFormat::Html);
        assert!(msg.keyboard.is_some());
    }
}
