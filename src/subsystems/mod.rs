//! Subsystem modules for pulsegate.

pub mod comms;
pub mod monitor;
pub mod runtime;
