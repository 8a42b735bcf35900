//! Coalesces a growing accumulator into rate-limited edits of one message.
//!
//! Text that outgrows the platform's message limit is sealed into the current
//! message and continues in a freshly sent one.

use crate::channels::{
    ChatId, EditMessage, MessageId, Messenger, PlatformError, SendMessage, TextFormat,
};
use crate::config::RelayConfig;
use crate::util::{char_len, split_point};
use std::time::Duration;
use tokio::time::Instant;

/// Smallest message window tried after the platform keeps reporting "too long".
const MIN_MESSAGE_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    /// New characters required before an interim edit.
    pub buffer_threshold: usize,
    /// Minimum spacing between edits.
    pub min_edit_interval: Duration,
    /// Rate-limited rounds tolerated by [`EditThrottler::finish`].
    pub max_flush_attempts: u32,
    /// Longest `retry_after` slept on inline.
    pub max_retry_wait: Duration,
    /// Longest text one message shows, in UTF-16 code units.
    pub max_message_len: usize,
}

impl ThrottlePolicy {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            buffer_threshold: config.buffer_threshold,
            min_edit_interval: config.min_edit_interval(),
            max_flush_attempts: config.max_flush_attempts.max(1),
            max_retry_wait: config.max_retry_after(),
            max_message_len: config.max_message_len.max(MIN_MESSAGE_LEN),
        }
    }
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

/// The message being progressively rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitTarget {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Already current, either locally known or reported by the platform.
    Unchanged,
    /// Still rate limited, or asked to wait longer than the policy allows;
    /// buffered text is kept.
    Deferred { retry_after: Duration },
}

pub struct EditThrottler {
    policy: ThrottlePolicy,
    target: CommitTarget,
    accumulated_text: String,
    /// Byte offset in `accumulated_text` where the target message's text starts.
    segment_start: usize,
    /// The current segment has no message yet; the next publish sends one.
    continuation_pending: bool,
    message_limit: usize,
    last_committed_text: String,
    last_committed_format: Option<TextFormat>,
    last_edit_time: Instant,
    uncommitted_char_count: usize,
    not_before: Option<Instant>,
    commits: usize,
}

impl EditThrottler {
    /// Start throttling edits of `target`. The placeholder that created the
    /// target counts as the most recent edit.
    pub fn new(policy: ThrottlePolicy, target: CommitTarget) -> Self {
        Self {
            policy,
            target,
            accumulated_text: String::new(),
            segment_start: 0,
            continuation_pending: false,
            message_limit: policy.max_message_len.max(MIN_MESSAGE_LEN),
            last_committed_text: String::new(),
            last_committed_format: None,
            last_edit_time: Instant::now(),
            uncommitted_char_count: 0,
            not_before: None,
            commits: 0,
        }
    }

    pub fn on_fragment(&mut self, text: &str) {
        self.accumulated_text.push_str(text);
        self.uncommitted_char_count += char_len(text);
    }

    pub fn should_commit(&self, now: Instant) -> bool {
        self.uncommitted_char_count >= self.policy.buffer_threshold
            && now.saturating_duration_since(self.last_edit_time) >= self.policy.min_edit_interval
            && self.not_before.is_none_or(|t| now >= t)
            && self.segment() != self.last_committed_text
    }

    /// Push the accumulated text to the target message, opening continuation
    /// messages for whatever exceeds the message limit.
    ///
    /// A rate limit is waited out and retried once, unless its wait exceeds
    /// `max_retry_wait`. "Not modified" counts as success. Any other rejection
    /// is returned to the caller.
    pub async fn commit(
        &mut self,
        messenger: &dyn Messenger,
        format: TextFormat,
    ) -> Result<CommitOutcome, PlatformError> {
        loop {
            let segment = self.segment();
            let cut = split_point(segment, self.message_limit);
            let sealing = cut < segment.len();
            let text = segment[..cut].to_string();

            let outcome = if text.is_empty()
                || (!self.continuation_pending
                    && text == self.last_committed_text
                    && self.last_committed_format == Some(format))
            {
                CommitOutcome::Unchanged
            } else {
                match self.publish(messenger, text, format).await {
                    Err(PlatformError::MessageTooLong) if self.message_limit > MIN_MESSAGE_LEN => {
                        self.message_limit = (self.message_limit / 2).max(MIN_MESSAGE_LEN);
                        tracing::warn!(
                            chat_id = self.target.chat_id,
                            limit = self.message_limit,
                            "Message rejected as too long; narrowing the window"
                        );
                        continue;
                    }
                    other => other?,
                }
            };

            if !sealing || matches!(outcome, CommitOutcome::Deferred { .. }) {
                return Ok(outcome);
            }
            self.seal(cut);
        }
    }

    /// Make the final text visible in `final_format`, ignoring the interval gate.
    pub async fn finish(
        &mut self,
        messenger: &dyn Messenger,
        final_format: TextFormat,
    ) -> Result<(), PlatformError> {
        let format_pending =
            !self.segment().is_empty() && self.last_committed_format != Some(final_format);
        if self.uncommitted_char_count == 0 && !format_pending {
            return Ok(());
        }

        let mut format = final_format;
        let mut attempt = 1;
        loop {
            let outcome = match self.commit(messenger, format).await {
                Err(PlatformError::MalformedMarkup(reason)) if format != TextFormat::Plain => {
                    tracing::warn!(
                        chat_id = self.target.chat_id,
                        "Final markup rejected ({reason}); resending as plain text"
                    );
                    format = TextFormat::Plain;
                    self.commit(messenger, format).await?
                }
                other => other?,
            };

            match outcome {
                CommitOutcome::Committed | CommitOutcome::Unchanged => return Ok(()),
                CommitOutcome::Deferred { retry_after } => {
                    if attempt >= self.policy.max_flush_attempts
                        || retry_after > self.policy.max_retry_wait
                    {
                        return Err(PlatformError::RateLimited {
                            retry_after: retry_after.as_secs(),
                        });
                    }
                    attempt += 1;
                    tokio::time::sleep(retry_after).await;
                }
            }
        }
    }

    /// Deliver `text` to the current segment's message, with one rate-limit retry.
    async fn publish(
        &mut self,
        messenger: &dyn Messenger,
        text: String,
        format: TextFormat,
    ) -> Result<CommitOutcome, PlatformError> {
        match self.deliver(messenger, &text, format).await {
            Err(PlatformError::RateLimited { retry_after }) => {
                let wait = Duration::from_secs(retry_after);
                if wait > self.policy.max_retry_wait {
                    return Ok(self.defer(wait));
                }
                tracing::debug!(
                    chat_id = self.target.chat_id,
                    retry_after,
                    "Edit rate limited; retrying once"
                );
                tokio::time::sleep(wait).await;
                match self.deliver(messenger, &text, format).await {
                    Err(PlatformError::RateLimited { retry_after }) => {
                        Ok(self.defer(Duration::from_secs(retry_after)))
                    }
                    other => self.settle(other, text, format),
                }
            }
            other => self.settle(other, text, format),
        }
    }

    async fn deliver(
        &mut self,
        messenger: &dyn Messenger,
        text: &str,
        format: TextFormat,
    ) -> Result<(), PlatformError> {
        if self.continuation_pending {
            let message_id = messenger
                .send(SendMessage::new(self.target.chat_id, text).with_format(format))
                .await?;
            tracing::debug!(
                chat_id = self.target.chat_id,
                message_id,
                "Reply continues in a new message"
            );
            self.target.message_id = message_id;
            self.continuation_pending = false;
            return Ok(());
        }
        messenger
            .edit(EditMessage {
                chat_id: self.target.chat_id,
                message_id: self.target.message_id,
                text: text.to_string(),
                format,
                keyboard: None,
            })
            .await
    }

    fn defer(&mut self, wait: Duration) -> CommitOutcome {
        self.not_before = Some(Instant::now() + wait);
        tracing::warn!(
            chat_id = self.target.chat_id,
            retry_after = wait.as_secs(),
            "Edit still rate limited; deferring"
        );
        CommitOutcome::Deferred { retry_after: wait }
    }

    fn settle(
        &mut self,
        result: Result<(), PlatformError>,
        text: String,
        format: TextFormat,
    ) -> Result<CommitOutcome, PlatformError> {
        let outcome = match result {
            Ok(()) => {
                self.commits += 1;
                CommitOutcome::Committed
            }
            Err(PlatformError::NotModified) => CommitOutcome::Unchanged,
            Err(e) => return Err(e),
        };
        self.uncommitted_char_count = 0;
        self.last_committed_text = text;
        self.last_committed_format = Some(format);
        self.last_edit_time = Instant::now();
        self.not_before = None;
        Ok(outcome)
    }

    /// The first `cut` bytes of the segment stay in the current message for good.
    fn seal(&mut self, cut: usize) {
        self.segment_start += cut;
        self.continuation_pending = true;
        self.last_committed_text.clear();
        self.last_committed_format = None;
        self.uncommitted_char_count = char_len(self.segment());
    }

    fn segment(&self) -> &str {
        &self.accumulated_text[self.segment_start..]
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    /// What the current target message shows.
    pub fn last_committed_text(&self) -> &str {
        &self.last_committed_text
    }

    pub fn uncommitted_char_count(&self) -> usize {
        self.uncommitted_char_count
    }

    /// The message currently being edited.
    pub fn target(&self) -> CommitTarget {
        self.target
    }

    /// Successful edits and continuation sends issued so far.
    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn is_empty(&self) -> bool {
        self.accumulated_text.is_empty()
    }
}
