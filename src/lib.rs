//! Teller Core
//!
//! Multi-currency account ledger with a serialized mutation queue and
//! fee accounting.
//!
//! # Architecture
//!
//! - **Single Writer**: one actor task applies money-moving operations
//!   strictly in submission order, eliminating lost updates
//! - **Atomic Mutations**: every balance change and its log record are
//!   committed in one storage transaction, or not at all
//! - **Append-Only Log**: transaction records are never updated or
//!   deleted after insertion
//! - **Fee Pool**: collected fees are accumulated in the reference
//!   currency, updated only after a successful commit
//!
//! # Invariants
//!
//! - Balances never go negative
//! - Exactly one transaction record per successful mutating operation
//! - A failed operation leaves no balance changes and no log records
//! - The fee pool equals the sum of all committed fees, converted

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod actor;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod policy;
pub mod store;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::Teller;
pub use policy::{ExchangePolicy, FeePool};
pub use store::Store;
pub use types::{
    Account, Currency, HistoryFilter, ProfitFilter, ProfitReport, TransactionKind,
    TransactionRecord, User,
};
