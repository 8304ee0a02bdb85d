//! Fan-out of turn chunks and orchestrator events to subscribers.

pub mod hub;

pub use hub::{topic, Frame, StreamingHub, Subscription};
