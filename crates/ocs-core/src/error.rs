//! Unified error handling for the charging engine
//!
//! Every failure the core can produce is one variant of [`AppError`]. The
//! variants are grouped the way callers need to react to them: validation
//! problems are rejected before any lock is taken, not-found is a typed
//! sentinel, lock timeouts may be retried, and storage failures are wrapped as
//! server errors.

use std::time::Duration;
use thiserror::Error;

/// Main engine error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    // ==================== Storage Errors ====================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ==================== Cache Errors ====================
    #[error("Cache error: {0}")]
    Cache(String),

    // ==================== Locking Errors ====================
    #[error("Timed out after {timeout_ms}ms waiting for locks on {keys:?}")]
    LockTimeout { keys: Vec<String>, timeout_ms: u64 },

    // ==================== Business Logic Errors ====================
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account disabled: {0}")]
    AccountDisabled(String),

    #[error("Unauthorized destination: {0}")]
    UnauthorizedDestination(String),

    #[error("Unsupported action type: {0}")]
    UnsupportedAction(String),

    #[error("Invalid value formula: {0}")]
    InvalidValueFormula(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Build a lock timeout error for the given keys
    pub fn lock_timeout(keys: &[String], timeout: Duration) -> Self {
        AppError::LockTimeout {
            keys: keys.to_vec(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Storage(_) => "storage_error",
            AppError::Serialization(_) => "serialization_error",
            AppError::Cache(_) => "cache_error",
            AppError::LockTimeout { .. } => "lock_timeout",
            AppError::AccountNotFound(_) => "account_not_found",
            AppError::AccountDisabled(_) => "account_disabled",
            AppError::UnauthorizedDestination(_) => "unauthorized_destination",
            AppError::UnsupportedAction(_) => "unsupported_action",
            AppError::InvalidValueFormula(_) => "invalid_value_formula",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::MissingField(_) => "missing_field",
            AppError::NotFound(_) => "not_found",
            AppError::AlreadyExists(_) => "already_exists",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
        }
    }

    /// Whether the error is the typed "not found" sentinel
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_) | AppError::AccountNotFound(_))
    }

    /// Whether re-running the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::LockTimeout { .. } | AppError::Storage(_) | AppError::Cache(_)
        )
    }

    /// Whether the error was produced by request validation
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_) | AppError::InvalidInput(_) | AppError::MissingField(_)
        )
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}
