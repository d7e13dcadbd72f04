//! Unified error type for the commission engine.
//!
//! Structural failures (missing rows, invalid input) abort the surrounding database
//! transaction. Inconsistent-but-tolerated data such as unbalanced split percentages
//! is never an error; it is reported through `tracing` warnings instead.

use rust_decimal::Decimal;
use thiserror::Error;

/// All errors produced by the commission engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded or parsed
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable description of the problem
        message: String,
    },

    /// Underlying `SeaORM` / database failure
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// File system failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Required environment variable missing or malformed
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    /// Referenced deal does not exist
    #[error("Deal {deal_id} not found")]
    DealNotFound {
        /// Requested deal id
        deal_id: i64,
    },

    /// Referenced payment does not exist
    #[error("Payment {payment_id} not found")]
    PaymentNotFound {
        /// Requested payment id
        payment_id: i64,
    },

    /// Payment was archived and no longer takes part in recalculation
    #[error("Payment {payment_id} is archived")]
    PaymentArchived {
        /// Archived payment id
        payment_id: i64,
    },

    /// Referenced commission split does not exist
    #[error("Commission split {split_id} not found")]
    CommissionSplitNotFound {
        /// Requested commission split id
        split_id: i64,
    },

    /// Referenced payment split does not exist
    #[error("Payment split {split_id} not found")]
    PaymentSplitNotFound {
        /// Requested payment split id
        split_id: i64,
    },

    /// Currency amount was negative
    #[error("Invalid amount: {amount}")]
    InvalidAmount {
        /// The rejected amount
        amount: Decimal,
    },

    /// Percentage outside 0..=100
    #[error("Invalid percentage for {field}: {value} (expected 0-100)")]
    InvalidPercent {
        /// Name of the offending field
        field: &'static str,
        /// The rejected value
        value: Decimal,
    },

    /// Broker already holds a commission split on this deal
    #[error("Broker {broker_id} already has a commission split on deal {deal_id}")]
    DuplicateBroker {
        /// Deal the split was added to
        deal_id: i64,
        /// Broker that is already assigned
        broker_id: i64,
    },

    /// Operator command line could not be understood
    #[error("Usage error: {message}")]
    Usage {
        /// What was wrong with the invocation
        message: String,
    },
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
