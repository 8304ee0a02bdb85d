//! Client for the long-term memory service.
//!
//! The backing store (vector index, knowledge graph) is an external
//! collaborator; this crate carries the [`MemoryStore`] trait the core
//! consumes, the REST implementation, and an in-memory double for tests
//! and embedded runs.

pub mod provider;
pub mod rest;
pub mod types;

pub use provider::{MemoryStore, StaticMemoryStore};
pub use rest::RestMemoryStore;
pub use types::{Fact, FactQuery};
