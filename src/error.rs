//! Engine error taxonomy.
//!
//! Validation and state errors are rejected before any ledger mutation.
//! Gateway errors are transient for deposits (the reconciler retries on
//! its next tick) and terminal for withdrawals (the record parks in
//! `Failed` for manual remediation — the debit stands either way).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad amount, address, or format.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested amount exceeds the funds available to the caller.
    #[error("insufficient balance: required {required} GP, available {available} GP")]
    InsufficientBalance { required: i64, available: i64 },

    /// Round not open, round already settled, duplicate settlement.
    /// Treated as a benign idempotency collision at trigger boundaries.
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// The external payment gateway rejected or failed a call.
    #[error("payment gateway error: {0}")]
    Gateway(String),

    /// Underlying store failure — fatal for the triggering request.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl EngineError {
    /// Wrap any displayable error as a gateway error.
    pub fn gateway(err: impl std::fmt::Display) -> Self {
        EngineError::Gateway(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
