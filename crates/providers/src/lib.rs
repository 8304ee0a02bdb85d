//! The model-client boundary.
//!
//! Provider SDKs live outside the core; everything here is the contract
//! they implement ([`ModelClient`]), the registry that resolves
//! `provider/model` specs, the transient-retry policy, and a scripted
//! mock for tests and offline runs.

pub mod mock;
pub mod registry;
pub mod retry;
pub mod traits;

pub use mock::{MockModelClient, ScriptedTurn};
pub use registry::ProviderRegistry;
pub use retry::{backoff_delay, with_retries};
pub use traits::{CompletionRequest, CompletionResponse, ModelClient};
