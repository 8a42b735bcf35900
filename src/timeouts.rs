//! Keyed single-active-timer registry.
//!
//! Each key has at most one pending timer. Arming a key that already has a
//! timer replaces the entry and cancels the old one under the same shard lock,
//! and a timer only fires after it has removed its own entry, so a replaced
//! timer can never fire. Different keys never contend on a global lock.

use dashmap::DashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::channels::{ChatId, MessageId};

/// What a menu timeout is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectKey {
    /// One settings menu per user.
    User(i64),
    /// One timer per mode-selection menu message.
    Message {
        chat_id: ChatId,
        message_id: MessageId,
    },
}

struct PendingTimer {
    generation: u64,
    token: CancellationToken,
}

pub struct TimeoutScheduler<K> {
    timers: Arc<DashMap<K, PendingTimer>>,
    next_generation: Arc<AtomicU64>,
}

impl<K> Clone for TimeoutScheduler<K> {
    fn clone(&self) -> Self {
        Self {
            timers: Arc::clone(&self.timers),
            next_generation: Arc::clone(&self.next_generation),
        }
    }
}

impl<K> Default for TimeoutScheduler<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> TimeoutScheduler<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            timers: Arc::new(DashMap::new()),
            next_generation: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Run `on_fire` after `duration` unless the key is re-armed or disarmed first.
    ///
    /// Any timer already pending for `key` is cancelled before this call returns.
    /// The entry removes itself whether it fires or is cancelled.
    pub fn arm<F, Fut>(&self, key: K, duration: Duration, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        let replaced = self.timers.insert(
            key.clone(),
            PendingTimer {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = replaced {
            previous.token.cancel();
            tracing::debug!(key = ?key, "Timeout re-armed; previous timer cancelled");
        }

        let timers = Arc::clone(&self.timers);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    timers.remove_if(&key, |_, t| t.generation == generation);
                }
                () = tokio::time::sleep(duration) => {
                    // Claim the entry; losing the race to a newer arm means we never fire.
                    if timers.remove_if(&key, |_, t| t.generation == generation).is_some() {
                        tracing::debug!(key = ?key, "Timeout fired");
                        on_fire().await;
                    }
                }
            }
        });
    }

    /// Cancel and remove the pending timer for `key`. Returns whether one existed.
    pub fn disarm(&self, key: &K) -> bool {
        match self.timers.remove(key) {
            Some((_, timer)) => {
                timer.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.timers.contains_key(key)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }

    /// Cancel every pending timer.
    pub fn shutdown(&self) {
        let cancelled = self.timers.len();
        self.timers.retain(|_, timer| {
            timer.token.cancel();
            false
        });
        if cancelled > 0 {
            tracing::info!(cancelled, "Timeout scheduler shut down");
        }
    }
}
