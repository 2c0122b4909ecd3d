//! Error types for scrollwatch

use thiserror::Error;

use crate::Domain;

/// Core error type for scrollwatch operations
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Rule not found: {0}")]
    RuleNotFound(Domain),

    #[error("Rule already exists: {0}")]
    RuleExists(Domain),

    #[error("Invalid domain: {0:?}")]
    InvalidDomain(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WatchError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
