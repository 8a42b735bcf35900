//! Streaming relay: one request/stream/finalize cycle per user turn.

pub mod orchestrator;
pub mod throttle;

pub use orchestrator::{InboundText, RelayOrchestrator, RelaySettings, TurnOutcome, TurnState};
pub use throttle::{CommitOutcome, CommitTarget, EditThrottler, ThrottlePolicy};

use crate::channels::PlatformError;
use crate::providers::GenerationError;
use crate::transcript::TranscriptError;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Transcript(#[from] TranscriptError),
}

/// Per-user turn serialization without a global lock.
#[derive(Clone, Default)]
pub struct TurnLocks {
    locks: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl TurnLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other turn for `user_id` is running.
    pub async fn acquire(&self, user_id: i64) -> TurnGuard {
        let lock = self.locks.entry(user_id).or_default().clone();
        let guard = lock.lock_owned().await;
        TurnGuard {
            guard: Some(guard),
            user_id,
            locks: Arc::clone(&self.locks),
        }
    }

    /// Users with a running or queued turn.
    pub fn active_users(&self) -> usize {
        self.locks.len()
    }
}

/// Held for the whole turn; drops its registry entry once nobody is waiting.
pub struct TurnGuard {
    guard: Option<OwnedMutexGuard<()>>,
    user_id: i64,
    locks: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
