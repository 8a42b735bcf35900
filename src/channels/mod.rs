pub mod telegram;
pub mod traits;

pub use telegram::TelegramChannel;
pub use traits::{
    CallbackQuery, ChatId, ChatKind, EditMessage, IncomingMessage, InlineButton, InlineKeyboard,
    MessageContent, MessageId, Messenger, PlatformError, SendMessage, TextFormat, Update,
    UserProfile,
};
