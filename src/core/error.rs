use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetgateError {
    /// Missing, unknown or expired session token.
    #[error("{0}")]
    Authentication(String),
    /// The organization requires MFA and the session has not completed it.
    #[error("MFA_REQUIRED_FOR_ORG")]
    MfaRequired,
    #[error("{0}")]
    Authorization(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    /// Invariant violation: last owner, duplicate slug, duplicate invitation.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Path error: {0}")]
    PathError(String),
}

impl FleetgateError {
    /// Machine-readable code carried in RPC error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            FleetgateError::Authentication(_) => "UNAUTHENTICATED",
            FleetgateError::MfaRequired => "MFA_REQUIRED_FOR_ORG",
            FleetgateError::Authorization(_) => "FORBIDDEN",
            FleetgateError::NotFound(_) => "NOT_FOUND",
            FleetgateError::ValidationError(_) => "VALIDATION",
            FleetgateError::Conflict(_) => "CONFLICT",
            FleetgateError::RusqliteError(_)
            | FleetgateError::IoError(_)
            | FleetgateError::JsonError(_)
            | FleetgateError::ConfigError(_)
            | FleetgateError::PathError(_) => "INTERNAL",
        }
    }

    /// Errors the caller caused, as opposed to infrastructure failures.
    pub fn is_client_error(&self) -> bool {
        self.code() != "INTERNAL"
    }
}
