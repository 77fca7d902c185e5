//! Daemon error types.

use thiserror::Error;

use wonbot_domain::DomainError;
use wonbot_exec::ExecError;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Request failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// signal_id was seen before
    #[error("Duplicate signal_id: {0}")]
    DuplicateSignal(String),

    /// Domain error (position state machine, value objects)
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Execution error
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Startup recovery failed
    #[error("Recovery error: {0}")]
    Recovery(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
