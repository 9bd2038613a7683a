//! Application layer: the orchestrator and the use cases built on it.
//!
//! Every operation lives on [`PaymentOrchestrator`]; the submodules only
//! split its `impl` blocks by concern.

pub mod admin;
pub mod orchestrator;
pub mod reporting;
pub mod vault;

pub use orchestrator::{PaymentOrchestrator, WebhookAck};
