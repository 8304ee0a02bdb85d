//! The orchestration gateway: coordination patterns, the turn runner,
//! tool execution, streaming fan-out, observability, and the HTTP/CLI
//! surface.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod observability;
pub mod runtime;
pub mod state;
pub mod streaming;
