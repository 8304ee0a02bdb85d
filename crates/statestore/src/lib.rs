//! Conversation, turn, and cost persistence over a Redis-semantics backend.
//!
//! [`StateStore`] is the high-level surface the runtime uses; it speaks in
//! conversations, turns, counters, and lists over namespaced keys with the
//! TTLs the configuration prescribes. The actual key-value engine sits
//! behind [`KvBackend`], with an in-process implementation shipped here;
//! `REDIS_URL` selects the backend at startup.

pub mod backend;
pub mod keys;
pub mod memory;
pub mod store;

pub use backend::KvBackend;
pub use memory::MemoryBackend;
pub use store::{StaleRead, StateStore, StoreTtls};
