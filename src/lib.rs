//! pulsegate: gateway health monitor.
//!
//! Polls downstream services concurrently, keeps one consistent health
//! snapshot, and pushes status transitions to WebSocket clients.  The binary
//! entry point is `src/main.rs`; this library root exposes the pieces for
//! integration tests and embedding.

pub mod bootstrap;
pub mod core;
pub mod subsystems;

pub use crate::bootstrap::logger;
pub use crate::core::{config, error};
