//! Per-conversation cancellation tokens.
//!
//! Each running orchestration registers a token keyed by conversation id.
//! Cancellation is cooperative: the loop checks at turn boundaries and at
//! every streamed chunk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Active cancellation tokens, one per running conversation.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<Uuid, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conversation_id: Uuid) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(conversation_id, token.clone());
        token
    }

    /// Signal cancellation. Returns whether a running loop was found.
    pub fn cancel(&self, conversation_id: Uuid) -> bool {
        match self.tokens.lock().get(&conversation_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, conversation_id: Uuid) {
        self.tokens.lock().remove(&conversation_id);
    }

    pub fn is_running(&self, conversation_id: Uuid) -> bool {
        self.tokens.lock().contains_key(&conversation_id)
    }
}
