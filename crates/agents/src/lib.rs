//! Agent descriptors and the hot-reloadable registry.
//!
//! Descriptors are plain text, one file per agent: a `key: value` header,
//! a `---` separator, then the system prompt body. The registry loads a
//! directory at startup and swaps snapshots atomically on reload.

pub mod descriptor;
pub mod registry;

pub use descriptor::{AgentDescriptor, CostTier};
pub use registry::{AgentFilter, AgentRegistry};
