use super::throttle::{CommitTarget, EditThrottler, ThrottlePolicy};
use super::{RelayError, TurnLocks};
use crate::channels::{ChatId, Messenger, SendMessage, TextFormat, UserProfile};
use crate::config::Config;
use crate::modes::ModeCatalog;
use crate::providers::{ChatMessage, ChatRequest, Fragment, GenerationError, Provider};
use crate::transcript::TranscriptStore;
use crate::util::char_len;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A plain-text message to answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundText {
    pub user: UserProfile,
    pub chat_id: ChatId,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingFirstFragment,
    Streaming,
    Finalizing,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed {
        commits: usize,
        chars: usize,
        transcript_saved: bool,
    },
    Failed {
        stage: TurnState,
        error: RelayError,
    },
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub policy: ThrottlePolicy,
    pub stream_idle_timeout: Duration,
    pub history_turns: usize,
    pub temperature: Option<f64>,
    pub placeholder_text: String,
    pub apology_text: String,
    pub empty_response_text: String,
    pub default_mode: String,
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        let relay = &config.relay;
        Self {
            policy: ThrottlePolicy::from_config(relay),
            stream_idle_timeout: relay.stream_idle_timeout(),
            history_turns: relay.history_turns,
            temperature: config.ollama.temperature,
            placeholder_text: relay.placeholder_text.clone(),
            apology_text: relay.apology_text.clone(),
            empty_response_text: relay.empty_response_text.clone(),
            default_mode: relay.default_mode.clone(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct RelayOrchestrator {
    provider: Arc<dyn Provider>,
    messenger: Arc<dyn Messenger>,
    store: Arc<dyn TranscriptStore>,
    modes: Arc<ModeCatalog>,
    settings: RelaySettings,
    turn_locks: TurnLocks,
}

/// Everything resolved before the placeholder goes out.
struct TurnContext {
    conversation_id: String,
    format: TextFormat,
    request: ChatRequest,
}

impl RelayOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        messenger: Arc<dyn Messenger>,
        store: Arc<dyn TranscriptStore>,
        modes: Arc<ModeCatalog>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            provider,
            messenger,
            store,
            modes,
            settings,
            turn_locks: TurnLocks::new(),
        }
    }

    /// Run one full turn. Turns of the same user run one at a time.
    ///
    /// A failed turn sends one apology and writes nothing to the transcript.
    pub async fn handle_turn(&self, inbound: InboundText) -> TurnOutcome {
        let user_id = inbound.user.id;
        let _turn = self.turn_locks.acquire(user_id).await;

        let mut state = TurnState::Idle;
        match self.run_turn(&inbound, &mut state).await {
            Ok(outcome) => {
                transition(&mut state, TurnState::Done, user_id);
                outcome
            }
            Err(error) => {
                let stage = state;
                transition(&mut state, TurnState::Failed, user_id);
                tracing::error!(
                    user_id,
                    chat_id = inbound.chat_id,
                    stage = ?stage,
                    error = %error,
                    "Relay turn failed"
                );
                self.send_apology(inbound.chat_id).await;
                TurnOutcome::Failed { stage, error }
            }
        }
    }

    async fn run_turn(
        &self,
        inbound: &InboundText,
        state: &mut TurnState,
    ) -> Result<TurnOutcome, RelayError> {
        let user_id = inbound.user.id;
        let ctx = self.prepare(inbound).await?;

        transition(state, TurnState::AwaitingFirstFragment, user_id);
        let placeholder = self
            .messenger
            .send(SendMessage::new(
                inbound.chat_id,
                self.settings.placeholder_text.clone(),
            ))
            .await?;
        let target = CommitTarget {
            chat_id: inbound.chat_id,
            message_id: placeholder,
        };
        let mut throttler = EditThrottler::new(self.settings.policy, target);

        let mut stream = self.provider.stream_chat(ctx.request).await?;
        let idle = self.settings.stream_idle_timeout;
        loop {
            let next = tokio::time::timeout(idle, stream.next())
                .await
                .map_err(|_| {
                    GenerationError::Transport(format!("no fragment received within {idle:?}"))
                })?;
            match next {
                None | Some(Ok(Fragment::Done)) => break,
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Fragment::Token { content, .. })) => {
                    if *state == TurnState::AwaitingFirstFragment {
                        transition(state, TurnState::Streaming, user_id);
                    }
                    throttler.on_fragment(&content);
                    if throttler.should_commit(Instant::now()) {
                        throttler
                            .commit(self.messenger.as_ref(), TextFormat::Plain)
                            .await?;
                    }
                }
            }
        }
        drop(stream);

        transition(state, TurnState::Finalizing, user_id);
        if throttler.is_empty() {
            tracing::warn!(user_id, "Model returned an empty response");
            let mut notice = EditThrottler::new(self.settings.policy, target);
            notice.on_fragment(&self.settings.empty_response_text);
            notice
                .finish(self.messenger.as_ref(), TextFormat::Plain)
                .await?;
        } else {
            throttler.finish(self.messenger.as_ref(), ctx.format).await?;
        }

        let bot_text = throttler.accumulated_text();
        let transcript_saved = match self
            .store
            .append_message(&ctx.conversation_id, &inbound.text, bot_text)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                // The user already sees the full reply; only the record is lost.
                tracing::warn!(
                    user_id,
                    conversation_id = %ctx.conversation_id,
                    error = %e,
                    "Failed to persist turn"
                );
                false
            }
        };

        Ok(TurnOutcome::Completed {
            commits: throttler.commits(),
            chars: char_len(bot_text),
            transcript_saved,
        })
    }

    /// Ensure user and conversation, pick the model and build the prompt.
    async fn prepare(&self, inbound: &InboundText) -> Result<TurnContext, RelayError> {
        let user = self.store.create_user(&inbound.user, inbound.chat_id).await?;
        let model = self.store.get_selected_model(user.id).await?;

        let existing = match &user.current_conversation_id {
            Some(id) => {
                self.store
                    .get_recent_conversation(id, self.settings.history_turns)
                    .await?
            }
            None => None,
        };

        let (conversation_id, mode_key, history) = match existing {
            Some(conversation) => (conversation.id, conversation.mode, conversation.messages),
            None => {
                let mode_key = self.settings.default_mode.clone();
                let id = self
                    .store
                    .create_conversation(user.id, &mode_key, &model)
                    .await?;
                tracing::info!(user_id = user.id, conversation_id = %id, mode = %mode_key, "Started conversation");
                self.send_welcome(inbound.chat_id, &mode_key).await;
                (id, mode_key, Vec::new())
            }
        };

        let mode = self.modes.resolve(&mode_key);
        let mut messages = Vec::with_capacity(2 + 2 * self.settings.history_turns);
        if !mode.prompt_prefix.trim().is_empty() {
            messages.push(ChatMessage::system(mode.prompt_prefix.clone()));
        }
        for pair in history {
            messages.push(ChatMessage::user(pair.user_text));
            if !pair.bot_text.is_empty() {
                messages.push(ChatMessage::assistant(pair.bot_text));
            }
        }
        messages.push(ChatMessage::user(inbound.text.clone()));

        Ok(TurnContext {
            conversation_id,
            format: mode.format(),
            request: ChatRequest {
                model,
                messages,
                temperature: self.settings.temperature,
            },
        })
    }

    async fn send_welcome(&self, chat_id: ChatId, mode_key: &str) {
        let mode = self.modes.resolve(mode_key);
        if mode.welcome_message.is_empty() {
            return;
        }
        let message = SendMessage::new(chat_id, mode.welcome_message.clone()).with_format(mode.format());
        if let Err(e) = self.messenger.send(message).await {
            tracing::warn!(chat_id, error = %e, "Failed to send welcome message");
        }
    }

    async fn send_apology(&self, chat_id: ChatId) {
        let message = SendMessage::new(chat_id, self.settings.apology_text.clone());
        if let Err(e) = self.messenger.send(message).await {
            tracing::warn!(chat_id, error = %e, "Failed to send apology");
        }
    }
}

fn transition(state: &mut TurnState, next: TurnState, user_id: i64) {
    tracing::debug!(user_id, from = ?*state, to = ?next, "Turn state");
    *state = next;
}
