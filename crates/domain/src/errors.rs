//! Error types used throughout the engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for CalSync
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum CalSyncError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Remote API error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CalSyncError {
    /// Whether the failure is expected to clear up on its own.
    ///
    /// Transient failures are not retried inside a run; the next scheduled
    /// fire is the retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited(_) => true,
            Self::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Stable label suitable for structured log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::Config(_) => "config",
            Self::Network(_) => "network",
            Self::Auth(_) => "auth",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::RateLimited(_) => "rate_limited",
            Self::Remote { .. } => "remote",
            Self::Internal(_) => "internal",
        }
    }
}

/// Result type alias for CalSync operations
pub type Result<T> = std::result::Result<T, CalSyncError>;
