//! Comms subsystem: external I/O channels.
//!
//! Each channel implements [`runtime::Component`](crate::subsystems::runtime::Component)
//! and is spawned next to the poll scheduler by `main`.  Channels capture
//! their shared monitor handles at construction time.

#[cfg(feature = "channel-axum")]
pub mod axum_channel;
