//! Per-conversation serialization.
//!
//! A conversation is owned by exactly one orchestration loop at a time:
//! turn N+1 cannot begin until turn N is persisted, and a second
//! concurrent request for the same conversation is refused as busy rather
//! than queued.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

/// Returned when a conversation already has a running loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvoBusy;

#[derive(Default)]
pub struct ConvoLockMap {
    locks: Mutex<HashMap<Uuid, Arc<Semaphore>>>,
}

/// Held for the duration of one orchestration; dropping it releases the
/// conversation.
#[derive(Debug)]
pub struct ConvoPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConvoLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a conversation. Fails immediately when a loop already owns it.
    pub fn try_acquire(&self, conversation_id: Uuid) -> Result<ConvoPermit, ConvoBusy> {
        let semaphore = {
            let mut locks = self.locks.lock();
            if locks.len() > 10_000 {
                locks.retain(|_, s| s.available_permits() == 0);
            }
            locks
                .entry(conversation_id)
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        semaphore
            .try_acquire_owned()
            .map(|permit| ConvoPermit { _permit: permit })
            .map_err(|_| ConvoBusy)
    }

    pub fn is_held(&self, conversation_id: Uuid) -> bool {
        self.locks
            .lock()
            .get(&conversation_id)
            .is_some_and(|s| s.available_permits() == 0)
    }
}
