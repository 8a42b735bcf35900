//! Menu rendering as pure functions of state.
//!
//! Handlers compare the desired [`MenuView`] with what the message currently
//! shows and only issue an edit when they differ.

use crate::channels::{InlineButton, InlineKeyboard, TextFormat, UserProfile};
use crate::modes::ModeCatalog;

pub const SETTINGS_TITLE: &str = "⚙️ Settings:";
pub const MODELS_TITLE: &str = "Select a model:";
pub const MODELS_UNAVAILABLE: &str = "Failed to retrieve AI models. Please try again later.";
pub const MODE_TIMEOUT: &str = "Mode selection timed out. Please try again.";
pub const MODE_NOT_FOUND: &str = "Selected mode not found.";
pub const MODEL_ALREADY_SELECTED: &str = "This model is already selected.";
pub const SETTINGS_EXITED: &str = "🚪 Exited the settings menu.";
pub const COMING_SOON: &str = "Coming soon.";
pub const ABOUT: &str = "llamarelay relays your messages to a local language model and streams \
                         the answer back as it is written. Use /mode to pick a persona and \
                         /settings to choose a model.";
pub const HELP: &str = "Available commands:\n\
                        /start - Start\n\
                        /help - Show available commands\n\
                        /mode - Choose a chatbot mode\n\
                        /settings - Choose the AI model\n\n\
                        Send any text message to talk to the current mode.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuView {
    pub text: String,
    pub format: TextFormat,
    pub keyboard: Option<InlineKeyboard>,
}

impl MenuView {
    /// True when `text` and `keyboard` already show this view.
    pub fn is_shown(&self, text: Option<&str>, keyboard: Option<&InlineKeyboard>) -> bool {
        let shown_keyboard = keyboard.filter(|k| !k.is_empty());
        let wanted_keyboard = self.keyboard.as_ref().filter(|k| !k.is_empty());
        text == Some(self.text.as_str()) && shown_keyboard == wanted_keyboard
    }
}

/// Callback payloads carried by menu buttons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    About,
    OpenSettings,
    AiModel,
    SelectModel(String),
    BackToSettings,
    ExitSettings,
    Language,
    YourName,
    Page(usize),
    Mode(String),
    Unknown(String),
}

impl MenuAction {
    pub fn parse(data: &str) -> Self {
        if let Some(model) = data.strip_prefix("select_model:") {
            return Self::SelectModel(model.to_string());
        }
        if let Some(key) = data.strip_prefix("mode:") {
            return Self::Mode(key.to_string());
        }
        if let Some(page) = data.strip_prefix("page:") {
            return page
                .parse()
                .map_or_else(|_| Self::Unknown(data.to_string()), Self::Page);
        }
        match data {
            "about" => Self::About,
            "settings" => Self::OpenSettings,
            "ai_model" => Self::AiModel,
            "back_to_settings" => Self::BackToSettings,
            "exit_settings" => Self::ExitSettings,
            "language" => Self::Language,
            "your_name" => Self::YourName,
            other => Self::Unknown(other.to_string()),
        }
    }
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn start_view(user: &UserProfile) -> MenuView {
    MenuView {
        text: format!("Welcome, <b>{}</b>!", escape_html(&user.full_name())),
        format: TextFormat::Html,
        keyboard: Some(InlineKeyboard::new(vec![vec![
            InlineButton::new("ℹ️ About", "about"),
            InlineButton::new("⚙️ Settings", "settings"),
        ]])),
    }
}

pub fn settings_view() -> MenuView {
    MenuView {
        text: SETTINGS_TITLE.to_string(),
        format: TextFormat::Plain,
        keyboard: Some(InlineKeyboard::new(vec![
            vec![InlineButton::new("🧠 AI Model", "ai_model")],
            vec![InlineButton::new("🇬🇧 Language (Coming Soon)", "language")],
            vec![InlineButton::new("🙋‍♀️ Your Name (Coming Soon)", "your_name")],
            vec![InlineButton::new("🚪 Exit", "exit_settings")],
        ])),
    }
}

pub fn models_view(models: &[String], selected: &str) -> MenuView {
    let mut rows: Vec<Vec<InlineButton>> = models
        .iter()
        .map(|name| {
            let label = if name == selected {
                format!("✅ {name}")
            } else {
                name.clone()
            };
            vec![InlineButton::new(label, format!("select_model:{name}"))]
        })
        .collect();
    rows.push(vec![
        InlineButton::new("🔙 Back", "back_to_settings"),
        InlineButton::new("🚪 Exit", "exit_settings"),
    ]);
    MenuView {
        text: MODELS_TITLE.to_string(),
        format: TextFormat::Plain,
        keyboard: Some(InlineKeyboard::new(rows)),
    }
}

pub fn models_unavailable_view() -> MenuView {
    MenuView {
        text: MODELS_UNAVAILABLE.to_string(),
        format: TextFormat::Plain,
        keyboard: None,
    }
}

pub fn modes_view(catalog: &ModeCatalog, page: usize, per_page: usize) -> MenuView {
    let pages = catalog.page_count(per_page);
    let page = page.min(pages.saturating_sub(1));

    let mut rows: Vec<Vec<InlineButton>> = catalog
        .page(page, per_page)
        .iter()
        .map(|m| vec![InlineButton::new(m.display_name.clone(), format!("mode:{}", m.key))])
        .collect();

    let mut nav = Vec::new();
    if page > 0 {
        nav.push(InlineButton::new("⬅️ Back", format!("page:{}", page - 1)));
    }
    if page + 1 < pages {
        nav.push(InlineButton::new("➡️ Next", format!("page:{}", page + 1)));
    }
    if !nav.is_empty() {
        rows.push(nav);
    }

    MenuView {
        text: format!("Select chat mode ({} modes available):", catalog.len()),
        format: TextFormat::Plain,
        keyboard: Some(InlineKeyboard::new(rows)),
    }
}

pub fn mode_timeout_view() -> MenuView {
    MenuView {
        text: MODE_TIMEOUT.to_string(),
        format: TextFormat::Plain,
        keyboard: None,
    }
}

pub fn model_changed(model: &str) -> String {
    format!("✅ Model changed to *{model}*.")
}

/// Reply for messages that carry no text.
pub fn unexpected_input(first_name: &str, kind: &str) -> String {
    let mut reply =
        format!("I'm sorry {first_name}, I can only process text messages. You sent a {kind}.");
    let hint = match kind {
        "document" => " If you want to share information, please type it as text.",
        "sticker" | "animation" => {
            " While I appreciate the sentiment, I can't interpret stickers or GIFs."
        }
        "photo" => " If you want to describe an image, please do so in text.",
        "voice" => " I don't have voice recognition capabilities. Please type your message.",
        "poll" => " I can't participate in polls. Feel free to ask your question in text form.",
        _ => "",
    };
    reply.push_str(hint);
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callbacks(view: &MenuView) -> Vec<String> {
        view.keyboard
            .iter()
            .flat_map(|k| k.rows.iter().flatten())
            .map(|b| b.callback_data.clone())
            .collect()
    }

    #[test]
    fn parse_menu_actions() {
        assert_eq!(MenuAction::parse("page:2"), MenuAction::Page(2));
        assert_eq!(MenuAction::parse("mode:artist"), MenuAction::Mode("artist".into()));
        assert_eq!(
            MenuAction::parse("select_model:llama3.2:latest"),
            MenuAction::SelectModel("llama3.2:latest".into())
        );
        assert_eq!(MenuAction::parse("exit_settings"), MenuAction::ExitSettings);
        assert_eq!(MenuAction::parse("page:x"), MenuAction::Unknown("page:x".into()));
        assert_eq!(MenuAction::parse("bogus"), MenuAction::Unknown("bogus".into()));
    }

    #[test]
    fn start_view_escapes_name() {
        let user = UserProfile {
            id: 1,
            first_name: "<Ada>".into(),
            last_name: Some("& Co".into()),
            username: None,
        };
        let view = start_view(&user);
        assert_eq!(view.text, "Welcome, <b>&lt;Ada&gt; &amp; Co</b>!");
        assert_eq!(view.format, TextFormat::Html);
        assert_eq!(callbacks(&view), vec!["about", "settings"]);
    }

    #[test]
    fn modes_view_paginates_with_navigation() {
        let catalog = ModeCatalog::builtin("assistant");

        let first = modes_view(&catalog, 0, 5);
        assert_eq!(first.text, "Select chat mode (15 modes available):");
        let data = callbacks(&first);
        assert_eq!(data.len(), 6);
        assert_eq!(data[0], "mode:assistant");
        assert_eq!(data[5], "page:1");

        let middle = callbacks(&modes_view(&catalog, 1, 5));
        assert!(middle.ends_with(&["page:0".to_string(), "page:2".to_string()]));

        let last = callbacks(&modes_view(&catalog, 7, 5));
        assert_eq!(last.last().unwrap(), "page:1");
        assert!(!last.iter().any(|d| d == "page:3"));
    }

    #[test]
    fn models_view_marks_selected() {
        let models = vec!["llama3.2".to_string(), "mistral".to_string()];
        let view = models_view(&models, "mistral");
        let rows = &view.keyboard.as_ref().unwrap().rows;
        assert_eq!(rows[0][0].text, "llama3.2");
        assert_eq!(rows[1][0].text, "✅ mistral");
        assert_eq!(rows[1][0].callback_data, "select_model:mistral");
        assert_eq!(rows[2].len(), 2);
    }

    #[test]
    fn is_shown_compares_text_and_keyboard() {
        let view = settings_view();
        assert!(view.is_shown(Some(SETTINGS_TITLE), view.keyboard.as_ref()));
        assert!(!view.is_shown(Some("other"), view.keyboard.as_ref()));
        assert!(!view.is_shown(Some(SETTINGS_TITLE), None));

        let bare = mode_timeout_view();
        assert!(bare.is_shown(Some(MODE_TIMEOUT), None));
        assert!(bare.is_shown(Some(MODE_TIMEOUT), Some(&InlineKeyboard::default())));
    }

    #[test]
    fn unexpected_input_hints() {
        assert_eq!(
            unexpected_input("Ada", "voice"),
            "I'm sorry Ada, I can only process text messages. You sent a voice. \
I don't have voice recognition capabilities. Please type your message."
        );
        assert!(unexpected_input("Ada", "sticker").contains("stickers or GIFs"));
        assert!(unexpected_input("Ada", "location").ends_with("You sent a location."));
    }
}
