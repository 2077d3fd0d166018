//! Resilience primitives shared by all provider adapters
//!
//! - Per-provider circuit breakers with a central registry
//! - A process-wide retry budget (token window)
//! - Monthly quota tracking with a short in-process exhaustion cooldown
//! - Deadline arithmetic for deadline-guarded calls
//!
//! These are small value types with synchronised methods; components hold
//! them behind `Arc` and never share their internals.

mod circuit;
mod deadline;
mod quota;
mod retry_budget;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitRegistry, CircuitState, CircuitStats};
pub use deadline::Deadline;
pub use quota::QuotaGate;
pub use retry_budget::RetryBudget;
