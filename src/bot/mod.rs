//! Update routing: commands, menus and relayed text.

pub mod menus;

use crate::channels::{
    CallbackQuery, ChatId, ChatKind, EditMessage, IncomingMessage, MessageContent, MessageId,
    Messenger, PlatformError, SendMessage, TextFormat, Update,
};
use crate::config::MenuConfig;
use crate::modes::ModeCatalog;
use crate::providers::Provider;
use crate::relay::{InboundText, RelayOrchestrator, TurnOutcome};
use crate::timeouts::{SubjectKey, TimeoutScheduler};
use crate::transcript::TranscriptStore;
use menus::{MenuAction, MenuView};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Short acknowledgement shown by the client for a button press.
#[derive(Debug, Default)]
struct CallbackReply {
    text: Option<String>,
    show_alert: bool,
}

impl CallbackReply {
    fn toast(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            show_alert: false,
        }
    }

    fn alert(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            show_alert: true,
        }
    }
}

pub struct BotDispatcher {
    messenger: Arc<dyn Messenger>,
    provider: Arc<dyn Provider>,
    store: Arc<dyn TranscriptStore>,
    modes: Arc<ModeCatalog>,
    relay: Arc<RelayOrchestrator>,
    timeouts: TimeoutScheduler<SubjectKey>,
    menus: MenuConfig,
}

impl BotDispatcher {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        provider: Arc<dyn Provider>,
        store: Arc<dyn TranscriptStore>,
        modes: Arc<ModeCatalog>,
        relay: Arc<RelayOrchestrator>,
        timeouts: TimeoutScheduler<SubjectKey>,
        menus: MenuConfig,
    ) -> Self {
        Self {
            messenger,
            provider,
            store,
            modes,
            relay,
            timeouts,
            menus,
        }
    }

    /// Handle `update` on its own task so slow turns never block other users.
    pub fn spawn(self: &Arc<Self>, update: Update) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.dispatch(update).await })
    }

    pub async fn dispatch(&self, update: Update) {
        match update {
            Update::Message(message) => {
                if let Err(e) = self.on_message(message).await {
                    tracing::warn!("Message handler failed: {e}");
                }
            }
            Update::Callback(callback) => self.on_callback(callback).await,
        }
    }

    async fn on_message(&self, message: IncomingMessage) -> anyhow::Result<()> {
        let chat_id = message.chat_id;
        match message.content {
            MessageContent::Command { name, .. } => match name.as_str() {
                "start" => {
                    let view = menus::start_view(&message.from);
                    self.send_view(chat_id, &view).await?;
                }
                "mode" => self.open_mode_menu(chat_id).await?,
                "settings" => self.open_settings_menu(chat_id, message.from.id).await?,
                _ => {
                    self.messenger
                        .send(SendMessage::new(chat_id, menus::HELP))
                        .await?;
                }
            },
            MessageContent::Text(text) => {
                if message.chat_kind != ChatKind::Private {
                    tracing::debug!(chat_id, "Ignoring text outside a private chat");
                    return Ok(());
                }
                let outcome = self
                    .relay
                    .handle_turn(InboundText {
                        user: message.from,
                        chat_id,
                        text,
                    })
                    .await;
                if let TurnOutcome::Completed {
                    commits,
                    chars,
                    transcript_saved,
                } = outcome
                {
                    tracing::info!(chat_id, commits, chars, transcript_saved, "Turn completed");
                }
            }
            MessageContent::Other(kind) => {
                let reply = menus::unexpected_input(&message.from.first_name, &kind);
                self.messenger.send(SendMessage::new(chat_id, reply)).await?;
            }
        }
        Ok(())
    }

    async fn on_callback(&self, callback: CallbackQuery) {
        let action = MenuAction::parse(&callback.data);
        let reply = match self.on_menu_action(&callback, action).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(
                    user_id = callback.from.id,
                    data = %callback.data,
                    "Callback handler failed: {e}"
                );
                CallbackReply::default()
            }
        };

        if let Err(e) = self
            .messenger
            .answer_callback(&callback.id, reply.text.as_deref(), reply.show_alert)
            .await
        {
            tracing::debug!("answerCallbackQuery failed: {e}");
        }
    }

    async fn on_menu_action(
        &self,
        cb: &CallbackQuery,
        action: MenuAction,
    ) -> anyhow::Result<CallbackReply> {
        let user_id = cb.from.id;
        match action {
            MenuAction::About => return Ok(CallbackReply::alert(menus::ABOUT)),
            MenuAction::OpenSettings => self.open_settings_menu(cb.chat_id, user_id).await?,
            MenuAction::Language | MenuAction::YourName => {
                return Ok(CallbackReply::toast(menus::COMING_SOON));
            }
            MenuAction::AiModel => {
                let view = match self.provider.list_models().await {
                    Ok(models) => {
                        let selected = self.store.get_selected_model(user_id).await?;
                        menus::models_view(&models, &selected)
                    }
                    Err(e) => {
                        tracing::error!("Error fetching models: {e}");
                        menus::models_unavailable_view()
                    }
                };
                self.render(cb, &view).await?;
                self.arm_settings_timeout(user_id, cb.chat_id, cb.message_id);
            }
            MenuAction::SelectModel(model) => {
                self.timeouts.disarm(&SubjectKey::User(user_id));
                let current = self.store.get_selected_model(user_id).await?;
                if model == current {
                    return Ok(CallbackReply::toast(menus::MODEL_ALREADY_SELECTED));
                }
                self.store.create_user(&cb.from, cb.chat_id).await?;
                self.store.set_selected_model(user_id, &model).await?;
                tracing::info!(user_id, model = %model, "Model selected");
                self.delete_menu(cb.chat_id, cb.message_id).await;
                self.messenger
                    .send(
                        SendMessage::new(cb.chat_id, menus::model_changed(&model))
                            .with_format(TextFormat::Markdown),
                    )
                    .await?;
            }
            MenuAction::BackToSettings => {
                self.render(cb, &menus::settings_view()).await?;
                self.arm_settings_timeout(user_id, cb.chat_id, cb.message_id);
            }
            MenuAction::ExitSettings => {
                self.timeouts.disarm(&SubjectKey::User(user_id));
                self.delete_menu(cb.chat_id, cb.message_id).await;
                self.messenger
                    .send(SendMessage::new(cb.chat_id, menus::SETTINGS_EXITED))
                    .await?;
            }
            MenuAction::Page(page) => {
                let view = menus::modes_view(&self.modes, page, self.menus.modes_per_page);
                self.render(cb, &view).await?;
                self.arm_mode_timeout(cb.chat_id, cb.message_id);
            }
            MenuAction::Mode(key) => {
                let Some(mode) = self.modes.get(&key) else {
                    return Ok(CallbackReply::alert(menus::MODE_NOT_FOUND));
                };
                let user = self.store.create_user(&cb.from, cb.chat_id).await?;
                let model = self.store.get_selected_model(user.id).await?;
                let conversation_id = self.store.create_conversation(user.id, &key, &model).await?;
                tracing::info!(user_id, conversation_id = %conversation_id, mode = %key, "Mode selected");

                self.timeouts.disarm(&SubjectKey::Message {
                    chat_id: cb.chat_id,
                    message_id: cb.message_id,
                });
                if let Err(e) = self.messenger.clear_keyboard(cb.chat_id, cb.message_id).await {
                    tracing::debug!("Failed to clear mode keyboard: {e}");
                }
                if !mode.welcome_message.is_empty() {
                    self.messenger
                        .send(
                            SendMessage::new(cb.chat_id, mode.welcome_message.clone())
                                .with_format(mode.format()),
                        )
                        .await?;
                }
            }
            MenuAction::Unknown(data) => {
                tracing::debug!(data = %data, "Unknown callback data");
            }
        }
        Ok(CallbackReply::default())
    }

    // ── Menus ────────────────────────────────────────────────────

    async fn open_mode_menu(&self, chat_id: ChatId) -> anyhow::Result<()> {
        let view = menus::modes_view(&self.modes, 0, self.menus.modes_per_page);
        let message_id = self.send_view(chat_id, &view).await?;
        self.arm_mode_timeout(chat_id, message_id);
        Ok(())
    }

    async fn open_settings_menu(&self, chat_id: ChatId, user_id: i64) -> anyhow::Result<()> {
        let message_id = self.send_view(chat_id, &menus::settings_view()).await?;
        self.arm_settings_timeout(user_id, chat_id, message_id);
        Ok(())
    }

    fn arm_mode_timeout(&self, chat_id: ChatId, message_id: MessageId) {
        let messenger = Arc::clone(&self.messenger);
        self.timeouts.arm(
            SubjectKey::Message {
                chat_id,
                message_id,
            },
            self.menus.mode_timeout(),
            move || async move {
                let view = menus::mode_timeout_view();
                let edit = EditMessage {
                    chat_id,
                    message_id,
                    text: view.text,
                    format: view.format,
                    keyboard: None,
                };
                match messenger.edit(edit).await {
                    Ok(()) | Err(PlatformError::NotModified) => {}
                    Err(e) => tracing::warn!(chat_id, message_id, "Mode menu timeout edit failed: {e}"),
                }
            },
        );
    }

    fn arm_settings_timeout(&self, user_id: i64, chat_id: ChatId, message_id: MessageId) {
        let messenger = Arc::clone(&self.messenger);
        self.timeouts.arm(
            SubjectKey::User(user_id),
            self.menus.settings_timeout(),
            move || async move {
                match messenger.delete(chat_id, message_id).await {
                    Ok(()) => tracing::info!(user_id, "Settings menu timed out"),
                    Err(PlatformError::NotFound) => {
                        tracing::info!(user_id, "Settings menu already gone at timeout");
                    }
                    Err(e) => tracing::warn!(user_id, "Settings menu timeout delete failed: {e}"),
                }
            },
        );
    }

    async fn delete_menu(&self, chat_id: ChatId, message_id: MessageId) {
        match self.messenger.delete(chat_id, message_id).await {
            Ok(()) | Err(PlatformError::NotFound) => {}
            Err(e) => tracing::warn!(chat_id, message_id, "Failed to delete menu: {e}"),
        }
    }

    async fn send_view(&self, chat_id: ChatId, view: &MenuView) -> Result<MessageId, PlatformError> {
        let mut message = SendMessage::new(chat_id, view.text.clone()).with_format(view.format);
        message.keyboard.clone_from(&view.keyboard);
        self.messenger.send(message).await
    }

    /// Edit the callback's message to `view` unless it already shows it.
    async fn render(&self, cb: &CallbackQuery, view: &MenuView) -> Result<(), PlatformError> {
        if view.is_shown(cb.message_text.as_deref(), cb.keyboard.as_ref()) {
            tracing::debug!(message_id = cb.message_id, "Menu unchanged, skipping edit");
            return Ok(());
        }
        let edit = EditMessage {
            chat_id: cb.chat_id,
            message_id: cb.message_id,
            text: view.text.clone(),
            format: view.format,
            keyboard: view.keyboard.clone(),
        };
        match self.messenger.edit(edit).await {
            Ok(()) | Err(PlatformError::NotModified) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
