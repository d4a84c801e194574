//! Core types for the ledger
//!
//! Amounts are `i64` minor units (cents) so additive arithmetic is
//! exact. Currency conversion is the one place floating point is used;
//! converted amounts are rounded back to minor units before they touch
//! a balance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Supported currency set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    /// Polish Zloty (reference currency)
    PLN,
    /// US Dollar
    USD,
    /// Euro
    EUR,
    /// British Pound
    GBP,
}

impl Currency {
    /// Every supported currency; a user owns one account per entry.
    pub const ALL: [Currency; 4] = [Currency::PLN, Currency::USD, Currency::EUR, Currency::GBP];

    /// The currency all exchange rates are expressed against and the
    /// fee pool is denominated in.
    pub const REFERENCE: Currency = Currency::PLN;

    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::PLN => "PLN",
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
        }
    }

    /// Parse from an ISO 4217 code
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "PLN" => Some(Currency::PLN),
            "USD" => Some(Currency::USD),
            "EUR" => Some(Currency::EUR),
            "GBP" => Some(Currency::GBP),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A registered user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID
    pub id: Uuid,

    /// Display name (non-empty)
    pub name: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// A per-currency account owned by a user
///
/// Exactly one account exists per (user, currency) pair; the full set
/// is created atomically with the user, each starting at balance 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Storage-assigned ID
    pub id: i64,

    /// Owning user
    pub user_id: Uuid,

    /// Account currency
    pub currency: Currency,

    /// Balance in minor units; never negative
    pub balance: i64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Kind of money-moving operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Funds added to an account
    Deposit,
    /// Funds removed from an account
    Withdrawal,
    /// Funds moved between two users, same currency
    Transfer,
    /// Same-user conversion between two currencies
    Exchange,
}

impl TransactionKind {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Transfer => "transfer",
            TransactionKind::Exchange => "exchange",
        }
    }

    /// Parse the storage representation
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TransactionKind::Deposit),
            "withdrawal" => Some(TransactionKind::Withdrawal),
            "transfer" => Some(TransactionKind::Transfer),
            "exchange" => Some(TransactionKind::Exchange),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only log record of one committed operation
///
/// Exactly one record is inserted per successful mutating operation,
/// in the same storage transaction as its balance updates. Records are
/// never updated or deleted, and they survive deletion of the issuing
/// user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Storage-assigned ID (0 until inserted)
    pub id: i64,

    /// Issuing user
    pub user_id: Uuid,

    /// Counterparty user (transfers only)
    pub target_user_id: Option<Uuid>,

    /// Account debited or credited by the issuer
    pub issuer_account_id: i64,

    /// Receiving account (transfers and exchanges)
    pub recipient_account_id: Option<i64>,

    /// Operation kind
    pub kind: TransactionKind,

    /// Principal amount in minor units of `currency`
    pub amount: i64,

    /// Source currency of the operation
    pub currency: Currency,

    /// Destination currency (exchanges only)
    pub target_currency: Option<Currency>,

    /// Fee charged, in minor units of `currency`
    pub fee_paid: i64,

    /// Commit timestamp
    pub made_at: DateTime<Utc>,
}

/// Conjunctive filter over the transaction log
///
/// Every field is optional; an absent field places no constraint.
/// Ranges are inclusive on both ends. The empty filter returns the
/// entire log.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Match records issued by this user
    pub user_id: Option<Uuid>,

    /// Match records in this source currency
    pub currency: Option<Currency>,

    /// Minimum principal amount (inclusive)
    pub min_amount: Option<i64>,

    /// Maximum principal amount (inclusive)
    pub max_amount: Option<i64>,

    /// Match records of this kind
    pub kind: Option<TransactionKind>,

    /// Earliest `made_at` (inclusive)
    pub from: Option<DateTime<Utc>>,

    /// Latest `made_at` (inclusive)
    pub to: Option<DateTime<Utc>>,
}

/// Optional constraints for profit aggregation
#[derive(Debug, Clone, Default)]
pub struct ProfitFilter {
    /// Restrict to records of this kind
    pub kind: Option<TransactionKind>,

    /// Earliest `made_at` (inclusive)
    pub from: Option<DateTime<Utc>>,

    /// Latest `made_at` (inclusive)
    pub to: Option<DateTime<Utc>>,
}

/// Aggregated net position of one user
///
/// All amounts are minor units of the reference currency; conversion
/// goes through the configured exchange rates, so values are floats.
#[derive(Debug, Clone)]
pub struct ProfitReport {
    /// Net profit across the matched records
    pub profit: f64,

    /// Total fees attributed to the user
    pub fees: f64,

    /// The records that contributed to the totals
    pub records: Vec<TransactionRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_from_code() {
        assert_eq!(Currency::from_code("PLN"), Some(Currency::PLN));
        assert_eq!(Currency::from_code("USD"), Some(Currency::USD));
        assert_eq!(Currency::from_code("XXX"), None);
    }

    #[test]
    fn test_currency_reference_is_supported() {
        assert!(Currency::ALL.contains(&Currency::REFERENCE));
    }

    #[test]
    fn test_transaction_kind_storage_repr() {
        assert_eq!(TransactionKind::from_str("transfer"), Some(TransactionKind::Transfer));
        assert_eq!(TransactionKind::from_str("unknown"), None);
        assert_eq!(TransactionKind::Withdrawal.as_str(), "withdrawal");
    }
}
