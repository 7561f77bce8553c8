//! Error types for the marketplace core
//!
//! One taxonomy for every operation: lookup, authorization and state
//! failures, accounting-specific failures, and storage/observer I/O.

use thiserror::Error;

/// Main error type for marketplace operations
#[derive(Error, Debug)]
pub enum EscrowError {
    /// Entity absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller is not allowed to perform the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Operation not valid for the entity's current status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed input, rejected before any mutation
    #[error("Validation error: {0}")]
    Validation(String),

    /// No wallet exists for the user; refunds never auto-create one
    #[error("Wallet not found for user {0}")]
    WalletNotFound(String),

    /// Currency code not known to the platform
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    /// Operation outside the implemented scope (e.g. token-account balance checks)
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The ledger medium cannot be read or written
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Composite failure surfaced to a task operation that required a refund
    #[error("Refund failed: {0}")]
    RefundFailed(String),

    /// Chain observer errors
    #[error("Chain observer error: {0}")]
    Observer(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EscrowError {
    /// Create a not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a forbidden error
    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Create an invalid-state error
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an unsupported-operation error
    pub fn unsupported_operation<S: Into<String>>(msg: S) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    /// Create a store-unavailable error
    pub fn store_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create a refund-failed error
    pub fn refund_failed<S: Into<String>>(msg: S) -> Self {
        Self::RefundFailed(msg.into())
    }

    /// Create a chain-observer error
    pub fn observer<S: Into<String>>(msg: S) -> Self {
        Self::Observer(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}
