//! Main teller orchestration layer
//!
//! Ties together the store, the exchange policy, and the actor into a
//! high-level API. Mutating calls are validated here, then queued;
//! read-only queries bypass the queue and hit storage directly, so a
//! read may observe state just before or just after an in-flight
//! mutation, never in between.
//!
//! # Example
//!
//! ```no_run
//! use teller_core::{Config, Currency, Teller};
//!
//! #[tokio::main]
//! async fn main() -> teller_core::Result<()> {
//!     let teller = Teller::open(Config::default()).await?;
//!
//!     let user = teller.create_user("alice").await?;
//!     teller.deposit(user, 10_00, Currency::PLN).await?;
//!
//!     teller.shutdown().await
//! }
//! ```

use tracing::instrument;
use uuid::Uuid;

use crate::actor::{spawn_teller_actor, TellerHandle};
use crate::metrics::Metrics;
use crate::policy::ExchangePolicy;
use crate::store::Store;
use crate::types::{
    Account, Currency, HistoryFilter, ProfitFilter, ProfitReport, TransactionKind,
    TransactionRecord,
};
use crate::{Config, Error, Result};

/// Main teller interface
#[derive(Debug)]
pub struct Teller {
    /// Actor handle for mutating operations
    handle: TellerHandle,

    /// Direct storage access (for reads)
    store: Store,

    /// Conversion rules and the fee pool
    policy: ExchangePolicy,

    /// Metrics collector
    metrics: Metrics,
}

impl Teller {
    /// Open the ledger with configuration
    ///
    /// Fails fast if the fee rate or any exchange rate is missing or
    /// non-positive.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let store = Store::open(&config).await?;
        let policy = ExchangePolicy::from_config(&config)?;
        let metrics = Metrics::new().map_err(|e| Error::Other(e.to_string()))?;
        let handle = spawn_teller_actor(store.clone(), policy.clone(), metrics.clone());

        Ok(Self {
            handle,
            store,
            policy,
            metrics,
        })
    }

    // Mutating operations (queued)

    /// Register a user; one zero-balance account per supported
    /// currency is created atomically with the user row
    #[instrument(skip(self, name))]
    pub async fn create_user(&self, name: &str) -> Result<Uuid> {
        if name.trim().is_empty() {
            return Err(Error::Validation("User name must be non-empty".to_string()));
        }
        self.handle.create_user(name.to_string()).await
    }

    /// Delete a user and their accounts; the transaction log is
    /// retained. Deleting an unknown ID succeeds without effect.
    #[instrument(skip(self))]
    pub async fn delete_user(&self, user_id: Uuid) -> Result<()> {
        self.handle.delete_user(user_id).await
    }

    /// Deposit `amount` minor units; the fee is deducted from the
    /// credited amount
    #[instrument(skip(self))]
    pub async fn deposit(&self, user_id: Uuid, amount: i64, currency: Currency) -> Result<()> {
        validate_amount(amount)?;
        self.handle.deposit(user_id, amount, currency).await
    }

    /// Withdraw `amount` minor units; `amount` plus fee must be
    /// covered by the balance. Returns the withdrawn amount.
    #[instrument(skip(self))]
    pub async fn withdraw(&self, user_id: Uuid, amount: i64, currency: Currency) -> Result<i64> {
        validate_amount(amount)?;
        self.handle.withdraw(user_id, amount, currency).await
    }

    /// Transfer `amount` to another user in the same currency; the
    /// issuer pays the fee, the recipient receives exactly `amount`.
    /// Returns the transferred amount.
    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        issuer_id: Uuid,
        recipient_id: Uuid,
        amount: i64,
        currency: Currency,
    ) -> Result<i64> {
        validate_amount(amount)?;
        if issuer_id == recipient_id {
            return Err(Error::Validation(
                "Transfer requires two distinct users".to_string(),
            ));
        }
        self.handle
            .transfer(issuer_id, recipient_id, amount, currency)
            .await
    }

    /// Convert `amount` from one of the user's accounts into another;
    /// the fee is charged in the source currency. An amount too small
    /// to yield a whole destination unit is rejected.
    #[instrument(skip(self))]
    pub async fn exchange(
        &self,
        user_id: Uuid,
        amount: i64,
        from: Currency,
        to: Currency,
    ) -> Result<()> {
        validate_amount(amount)?;
        if from == to {
            return Err(Error::Validation(
                "Exchange requires two distinct currencies".to_string(),
            ));
        }
        self.handle.exchange(user_id, amount, from, to).await
    }

    // Read operations (not queued)

    /// Balance of a (user, currency) account; `None` when unknown
    pub async fn balance(&self, user_id: Uuid, currency: Currency) -> Result<Option<i64>> {
        Ok(self.account(user_id, currency).await?.map(|a| a.balance))
    }

    /// Account lookup; `None` when unknown
    pub async fn account(&self, user_id: Uuid, currency: Currency) -> Result<Option<Account>> {
        self.store.account(user_id, currency).await
    }

    /// Filtered transaction history; the empty filter returns the
    /// entire log
    pub async fn history(&self, filter: &HistoryFilter) -> Result<Vec<TransactionRecord>> {
        self.store.history(filter).await
    }

    /// Aggregate a user's net position over matching records
    ///
    /// A record contributes when the user issued it, or is the named
    /// counterparty of a transfer. All amounts are converted to the
    /// reference currency. An unknown user yields an empty report.
    pub async fn profits(&self, user_id: Uuid, filter: &ProfitFilter) -> Result<ProfitReport> {
        let records = self.store.history_for_party(user_id, filter).await?;

        let mut profit = 0.0;
        let mut fees = 0.0;

        for record in &records {
            let amount =
                self.policy
                    .convert(record.amount as f64, record.currency, Currency::REFERENCE);
            let fee =
                self.policy
                    .convert(record.fee_paid as f64, record.currency, Currency::REFERENCE);

            match record.kind {
                TransactionKind::Deposit => {
                    profit += amount - fee;
                    fees += fee;
                }
                TransactionKind::Withdrawal => {
                    profit -= amount + fee;
                    fees += fee;
                }
                TransactionKind::Transfer if record.user_id == user_id => {
                    profit -= amount + fee;
                    fees += fee;
                }
                // Named counterparty: credited the full amount, no fee
                TransactionKind::Transfer => {
                    profit += amount;
                }
                // Same-user asset conversion: no net position change
                TransactionKind::Exchange => {
                    fees += fee;
                }
            }
        }

        Ok(ProfitReport {
            profit,
            fees,
            records,
        })
    }

    /// Total fees collected so far, in reference-currency minor units
    pub fn collected_fees(&self) -> f64 {
        self.policy.collected_fees()
    }

    /// Metrics collector (instance registry)
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Shutdown the ledger, draining the queue
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await
    }
}

fn validate_amount(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(Error::Validation(format!(
            "Amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_teller() -> Teller {
        Teller::open(Config::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_deposit_then_withdraw_scenario() {
        let teller = create_test_teller().await;
        let user = teller.create_user("alice").await.unwrap();

        teller.deposit(user, 1000, Currency::PLN).await.unwrap();
        assert_eq!(teller.balance(user, Currency::PLN).await.unwrap(), Some(950));

        let withdrawn = teller.withdraw(user, 500, Currency::PLN).await.unwrap();
        assert_eq!(withdrawn, 500);
        assert_eq!(teller.balance(user, Currency::PLN).await.unwrap(), Some(425));

        let history = teller
            .history(&HistoryFilter {
                user_id: Some(user),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, TransactionKind::Deposit);
        assert_eq!(history[1].kind, TransactionKind::Withdrawal);

        teller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_scenario() {
        let teller = create_test_teller().await;
        let user = teller.create_user("alice").await.unwrap();

        teller.deposit(user, 1000, Currency::PLN).await.unwrap();
        teller
            .exchange(user, 500, Currency::PLN, Currency::USD)
            .await
            .unwrap();

        // 1000 * 0.95 - 500 * 1.05 = 425
        assert_eq!(teller.balance(user, Currency::PLN).await.unwrap(), Some(425));
        // 500 * 0.25 = 125
        assert_eq!(teller.balance(user, Currency::USD).await.unwrap(), Some(125));

        teller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_transfer_moves_exact_amount() {
        let teller = create_test_teller().await;
        let alice = teller.create_user("alice").await.unwrap();
        let bob = teller.create_user("bob").await.unwrap();

        teller.deposit(alice, 1000, Currency::PLN).await.unwrap();
        teller.transfer(alice, bob, 400, Currency::PLN).await.unwrap();

        // 950 - 400 * 1.05 = 530
        assert_eq!(teller.balance(alice, Currency::PLN).await.unwrap(), Some(530));
        assert_eq!(teller.balance(bob, Currency::PLN).await.unwrap(), Some(400));

        let transfers = teller
            .history(&HistoryFilter {
                kind: Some(TransactionKind::Transfer),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(transfers.len(), 1);

        teller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_validation_rejects_before_side_effects() {
        let teller = create_test_teller().await;
        let user = teller.create_user("alice").await.unwrap();

        assert!(matches!(
            teller.deposit(user, 0, Currency::PLN).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            teller.deposit(user, -5, Currency::PLN).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            teller.create_user("  ").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            teller.transfer(user, user, 100, Currency::PLN).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            teller.exchange(user, 100, Currency::PLN, Currency::PLN).await,
            Err(Error::Validation(_))
        ));

        assert!(teller
            .history(&HistoryFilter::default())
            .await
            .unwrap()
            .is_empty());

        teller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_user_reads_are_absent_not_errors() {
        let teller = create_test_teller().await;
        let unknown = Uuid::new_v4();

        assert_eq!(teller.balance(unknown, Currency::PLN).await.unwrap(), None);
        assert!(teller.account(unknown, Currency::USD).await.unwrap().is_none());

        let report = teller.profits(unknown, &ProfitFilter::default()).await.unwrap();
        assert_eq!(report.profit, 0.0);
        assert!(report.records.is_empty());

        teller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_unknown_user_is_noop() {
        let teller = create_test_teller().await;
        teller.delete_user(Uuid::new_v4()).await.unwrap();
        teller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_keeps_audit_history() {
        let teller = create_test_teller().await;
        let user = teller.create_user("alice").await.unwrap();

        teller.deposit(user, 1000, Currency::PLN).await.unwrap();
        teller.delete_user(user).await.unwrap();

        assert_eq!(teller.balance(user, Currency::PLN).await.unwrap(), None);
        let history = teller
            .history(&HistoryFilter {
                user_id: Some(user),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(history.len(), 1);

        teller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_profit_aggregation() {
        let teller = create_test_teller().await;
        let alice = teller.create_user("alice").await.unwrap();
        let bob = teller.create_user("bob").await.unwrap();

        teller.deposit(alice, 1000, Currency::PLN).await.unwrap();
        teller.transfer(alice, bob, 200, Currency::PLN).await.unwrap();

        // Alice: +(1000-50) from the deposit, -(200+10) from the transfer
        let alice_report = teller.profits(alice, &ProfitFilter::default()).await.unwrap();
        assert!((alice_report.profit - 740.0).abs() < 1e-9);
        assert!((alice_report.fees - 60.0).abs() < 1e-9);
        assert_eq!(alice_report.records.len(), 2);

        // Bob never issued anything; credited the transfer amount, no fee
        let bob_report = teller.profits(bob, &ProfitFilter::default()).await.unwrap();
        assert!((bob_report.profit - 200.0).abs() < 1e-9);
        assert_eq!(bob_report.fees, 0.0);
        assert_eq!(bob_report.records.len(), 1);

        teller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_profit_filter_by_kind() {
        let teller = create_test_teller().await;
        let user = teller.create_user("alice").await.unwrap();

        teller.deposit(user, 1000, Currency::PLN).await.unwrap();
        teller.withdraw(user, 100, Currency::PLN).await.unwrap();

        let filter = ProfitFilter {
            kind: Some(TransactionKind::Deposit),
            ..Default::default()
        };
        let report = teller.profits(user, &filter).await.unwrap();
        assert_eq!(report.records.len(), 1);
        assert!((report.profit - 950.0).abs() < 1e-9);

        teller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_profit_time_window_is_inclusive() {
        let teller = create_test_teller().await;
        let user = teller.create_user("alice").await.unwrap();

        teller.deposit(user, 1000, Currency::PLN).await.unwrap();
        teller.withdraw(user, 100, Currency::PLN).await.unwrap();

        let history = teller.history(&HistoryFilter::default()).await.unwrap();
        let deposited_at = history[0].made_at;
        let withdrawn_at = history[1].made_at;

        // Bounds sitting exactly on the record timestamps keep both
        let window = ProfitFilter {
            from: Some(deposited_at),
            to: Some(withdrawn_at),
            ..Default::default()
        };
        let report = teller.profits(user, &window).await.unwrap();
        assert_eq!(report.records.len(), 2);

        // Starting at the withdrawal drops the deposit from the aggregate
        let later = ProfitFilter {
            from: Some(withdrawn_at),
            ..Default::default()
        };
        let report = teller.profits(user, &later).await.unwrap();
        assert_eq!(report.records.len(), 1);
        assert!((report.profit + 105.0).abs() < 1e-9);
        assert!((report.fees - 5.0).abs() < 1e-9);

        teller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_fee_pool_converts_to_reference() {
        let teller = create_test_teller().await;
        let user = teller.create_user("alice").await.unwrap();

        teller.deposit(user, 1000, Currency::PLN).await.unwrap();
        teller.deposit(user, 1000, Currency::USD).await.unwrap();

        // 50 PLN + 50 USD (= 200 PLN)
        assert!((teller.collected_fees() - 250.0).abs() < 1e-9);

        teller.shutdown().await.unwrap();
    }
}
