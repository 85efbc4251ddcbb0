//! Application-wide error types.
//!
//! Only startup and server-lifecycle failures surface as [`AppError`].
//! Steady-state failures (a probe that times out, a client whose socket
//! closed) are folded into health data by the monitor subsystem and never
//! reach this type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("server error: {0}")]
    Server(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("no service endpoints configured".into());
        assert!(e.to_string().starts_with("config error"));
        assert!(e.to_string().contains("no service endpoints"));
    }

    #[test]
    fn logger_error_display() {
        let e = AppError::Logger("already initialized".into());
        assert!(e.to_string().contains("already initialized"));
    }

    #[test]
    fn server_error_display() {
        let e = AppError::Server("bind failed on 127.0.0.1:3000".into());
        assert!(e.to_string().contains("bind failed"));
    }
}
