//! Error types for the ledger

use thiserror::Error;
use uuid::Uuid;

use crate::types::Currency;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (SQLite)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Input rejected before any side effect
    #[error("Validation error: {0}")]
    Validation(String),

    /// No account for the given (user, currency) pair
    #[error("No {currency} account for user {user_id}")]
    AccountNotFound {
        /// Owner the lookup was performed for
        user_id: Uuid,
        /// Currency of the missing account
        currency: Currency,
    },

    /// Balance does not cover amount plus fee
    #[error("Insufficient funds: need {needed} minor units, available {available}")]
    InsufficientFunds {
        /// Amount plus fee, in minor units
        needed: i64,
        /// Current balance, in minor units
        available: i64,
    },

    /// Queue error (actor mailbox closed, reply channel dropped)
    #[error("Queue error: {0}")]
    Queue(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
