//! Actor-based serialization of mutating operations
//!
//! One spawned task owns the store and applies money-moving operations
//! strictly one at a time, in mailbox (submission) order. The mailbox
//! is the only concurrency primitive: SQLite's own isolation is not
//! enough to protect the multi-row read-modify-write sequences used by
//! transfer and exchange, so no two of them may ever interleave.
//!
//! Every operation follows the same shape: load and check outside any
//! transaction, then `BEGIN`, apply all balance updates plus exactly
//! one log insert, `COMMIT`, and only then add the fee to the pool.
//! Rejections (not-found, insufficient funds) never open a
//! transaction; a mid-write failure rolls the open one back on drop.

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::policy::ExchangePolicy;
use crate::store::Store;
use crate::types::{Currency, TransactionKind, TransactionRecord, User};
use crate::{Error, Result};

/// Message sent to the teller actor
pub enum TellerMessage {
    /// Register a user with one zero-balance account per currency
    CreateUser {
        /// Display name, already validated non-empty
        name: String,
        /// Reply channel
        reply: oneshot::Sender<Result<Uuid>>,
    },

    /// Delete a user; unknown IDs are a no-op
    DeleteUser {
        /// User to delete
        user_id: Uuid,
        /// Reply channel
        reply: oneshot::Sender<Result<()>>,
    },

    /// Add funds to an account, net of fee
    Deposit {
        /// Account owner
        user_id: Uuid,
        /// Principal amount, minor units
        amount: i64,
        /// Account currency
        currency: Currency,
        /// Reply channel
        reply: oneshot::Sender<Result<()>>,
    },

    /// Remove funds plus fee from an account
    Withdraw {
        /// Account owner
        user_id: Uuid,
        /// Principal amount, minor units
        amount: i64,
        /// Account currency
        currency: Currency,
        /// Reply channel (withdrawn amount)
        reply: oneshot::Sender<Result<i64>>,
    },

    /// Move funds between two users in one currency
    Transfer {
        /// Sending user
        issuer_id: Uuid,
        /// Receiving user
        recipient_id: Uuid,
        /// Principal amount, minor units
        amount: i64,
        /// Currency of both accounts
        currency: Currency,
        /// Reply channel (transferred amount)
        reply: oneshot::Sender<Result<i64>>,
    },

    /// Convert funds between two accounts of one user
    Exchange {
        /// Account owner
        user_id: Uuid,
        /// Principal amount in `from` minor units
        amount: i64,
        /// Source currency
        from: Currency,
        /// Destination currency
        to: Currency,
        /// Reply channel
        reply: oneshot::Sender<Result<()>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes teller messages
pub struct TellerActor {
    store: Store,
    policy: ExchangePolicy,
    metrics: Metrics,
    mailbox: mpsc::Receiver<TellerMessage>,
}

impl TellerActor {
    /// Create new actor
    pub fn new(
        store: Store,
        policy: ExchangePolicy,
        metrics: Metrics,
        mailbox: mpsc::Receiver<TellerMessage>,
    ) -> Self {
        Self {
            store,
            policy,
            metrics,
            mailbox,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                TellerMessage::Shutdown => break,
                other => self.handle_message(other).await,
            }
        }
    }

    /// Handle a single message; a failed operation is terminal for that
    /// operation only, the loop keeps going
    async fn handle_message(&mut self, msg: TellerMessage) {
        match msg {
            TellerMessage::CreateUser { name, reply } => {
                let result = self.create_user(name).await;
                self.metrics.observe("create_user", result.is_ok());
                let _ = reply.send(result);
            }

            TellerMessage::DeleteUser { user_id, reply } => {
                let result = self.delete_user(user_id).await;
                self.metrics.observe("delete_user", result.is_ok());
                let _ = reply.send(result);
            }

            TellerMessage::Deposit {
                user_id,
                amount,
                currency,
                reply,
            } => {
                let result = self.deposit(user_id, amount, currency).await;
                self.metrics.observe("deposit", result.is_ok());
                let _ = reply.send(result);
            }

            TellerMessage::Withdraw {
                user_id,
                amount,
                currency,
                reply,
            } => {
                let result = self.withdraw(user_id, amount, currency).await;
                self.metrics.observe("withdraw", result.is_ok());
                let _ = reply.send(result);
            }

            TellerMessage::Transfer {
                issuer_id,
                recipient_id,
                amount,
                currency,
                reply,
            } => {
                let result = self.transfer(issuer_id, recipient_id, amount, currency).await;
                self.metrics.observe("transfer", result.is_ok());
                let _ = reply.send(result);
            }

            TellerMessage::Exchange {
                user_id,
                amount,
                from,
                to,
                reply,
            } => {
                let result = self.exchange(user_id, amount, from, to).await;
                self.metrics.observe("exchange", result.is_ok());
                let _ = reply.send(result);
            }

            TellerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    async fn create_user(&self, name: String) -> Result<Uuid> {
        let user = User {
            id: Uuid::new_v4(),
            name,
            created_at: Utc::now(),
        };

        let mut tx = self.store.begin().await?;
        self.store.insert_user(&mut tx, &user).await?;
        for currency in Currency::ALL {
            self.store
                .insert_account(&mut tx, user.id, currency, user.created_at)
                .await?;
        }
        tx.commit().await?;

        info!(user_id = %user.id, "User created");
        Ok(user.id)
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<()> {
        // Single statement; accounts cascade, the log stays.
        self.store.delete_user(user_id).await?;
        info!(user_id = %user_id, "User deleted");
        Ok(())
    }

    async fn deposit(&self, user_id: Uuid, amount: i64, currency: Currency) -> Result<()> {
        let account = self
            .store
            .account(user_id, currency)
            .await?
            .ok_or(Error::AccountNotFound { user_id, currency })?;

        let fee = self.policy.fee(amount);
        let balance = checked_sum(account.balance, amount - fee)?;

        let mut tx = self.store.begin().await?;
        self.store
            .update_balance(&mut tx, account.id, balance)
            .await?;
        self.store
            .insert_record(
                &mut tx,
                &TransactionRecord {
                    id: 0,
                    user_id,
                    target_user_id: None,
                    issuer_account_id: account.id,
                    recipient_account_id: None,
                    kind: TransactionKind::Deposit,
                    amount,
                    currency,
                    target_currency: None,
                    fee_paid: fee,
                    made_at: Utc::now(),
                },
            )
            .await?;
        tx.commit().await?;

        self.collect(fee, currency);
        info!(user_id = %user_id, amount, currency = %currency, fee, "Deposit committed");
        Ok(())
    }

    async fn withdraw(&self, user_id: Uuid, amount: i64, currency: Currency) -> Result<i64> {
        let account = self
            .store
            .account(user_id, currency)
            .await?
            .ok_or(Error::AccountNotFound { user_id, currency })?;

        let fee = self.policy.fee(amount);
        let needed = checked_sum(amount, fee)?;
        if needed > account.balance {
            return Err(Error::InsufficientFunds {
                needed,
                available: account.balance,
            });
        }

        let mut tx = self.store.begin().await?;
        self.store
            .update_balance(&mut tx, account.id, account.balance - needed)
            .await?;
        self.store
            .insert_record(
                &mut tx,
                &TransactionRecord {
                    id: 0,
                    user_id,
                    target_user_id: None,
                    issuer_account_id: account.id,
                    recipient_account_id: None,
                    kind: TransactionKind::Withdrawal,
                    amount,
                    currency,
                    target_currency: None,
                    fee_paid: fee,
                    made_at: Utc::now(),
                },
            )
            .await?;
        tx.commit().await?;

        self.collect(fee, currency);
        info!(user_id = %user_id, amount, currency = %currency, fee, "Withdrawal committed");
        Ok(amount)
    }

    async fn transfer(
        &self,
        issuer_id: Uuid,
        recipient_id: Uuid,
        amount: i64,
        currency: Currency,
    ) -> Result<i64> {
        let issuer = self
            .store
            .account(issuer_id, currency)
            .await?
            .ok_or(Error::AccountNotFound {
                user_id: issuer_id,
                currency,
            })?;
        let recipient = self
            .store
            .account(recipient_id, currency)
            .await?
            .ok_or(Error::AccountNotFound {
                user_id: recipient_id,
                currency,
            })?;

        let fee = self.policy.fee(amount);
        let needed = checked_sum(amount, fee)?;
        if needed > issuer.balance {
            return Err(Error::InsufficientFunds {
                needed,
                available: issuer.balance,
            });
        }
        let credited = checked_sum(recipient.balance, amount)?;

        // One record, issuer perspective; recipient is charged nothing.
        let mut tx = self.store.begin().await?;
        self.store
            .update_balance(&mut tx, issuer.id, issuer.balance - needed)
            .await?;
        self.store
            .update_balance(&mut tx, recipient.id, credited)
            .await?;
        self.store
            .insert_record(
                &mut tx,
                &TransactionRecord {
                    id: 0,
                    user_id: issuer_id,
                    target_user_id: Some(recipient_id),
                    issuer_account_id: issuer.id,
                    recipient_account_id: Some(recipient.id),
                    kind: TransactionKind::Transfer,
                    amount,
                    currency,
                    target_currency: None,
                    fee_paid: fee,
                    made_at: Utc::now(),
                },
            )
            .await?;
        tx.commit().await?;

        self.collect(fee, currency);
        info!(
            issuer = %issuer_id,
            recipient = %recipient_id,
            amount,
            currency = %currency,
            fee,
            "Transfer committed"
        );
        Ok(amount)
    }

    async fn exchange(
        &self,
        user_id: Uuid,
        amount: i64,
        from: Currency,
        to: Currency,
    ) -> Result<()> {
        let source = self
            .store
            .account(user_id, from)
            .await?
            .ok_or(Error::AccountNotFound {
                user_id,
                currency: from,
            })?;
        let destination = self
            .store
            .account(user_id, to)
            .await?
            .ok_or(Error::AccountNotFound {
                user_id,
                currency: to,
            })?;

        // Fee on the principal, charged in the source currency.
        let fee = self.policy.fee(amount);
        let needed = checked_sum(amount, fee)?;
        if needed > source.balance {
            return Err(Error::InsufficientFunds {
                needed,
                available: source.balance,
            });
        }

        let converted = self.policy.convert(amount as f64, from, to).round() as i64;
        if converted == 0 {
            return Err(Error::Validation(format!(
                "{} {} is too small to convert into a whole {} unit",
                amount, from, to
            )));
        }
        let credited = checked_sum(destination.balance, converted)?;

        let mut tx = self.store.begin().await?;
        self.store
            .update_balance(&mut tx, source.id, source.balance - needed)
            .await?;
        self.store
            .update_balance(&mut tx, destination.id, credited)
            .await?;
        self.store
            .insert_record(
                &mut tx,
                &TransactionRecord {
                    id: 0,
                    user_id,
                    target_user_id: None,
                    issuer_account_id: source.id,
                    recipient_account_id: Some(destination.id),
                    kind: TransactionKind::Exchange,
                    amount,
                    currency: from,
                    target_currency: Some(to),
                    fee_paid: fee,
                    made_at: Utc::now(),
                },
            )
            .await?;
        tx.commit().await?;

        self.collect(fee, from);
        info!(
            user_id = %user_id,
            amount,
            from = %from,
            to = %to,
            converted,
            fee,
            "Exchange committed"
        );
        Ok(())
    }

    fn collect(&self, fee: i64, currency: Currency) {
        self.policy.collect_fee(fee, currency);
        self.metrics.fee_pool.set(self.policy.collected_fees());
    }
}

fn checked_sum(a: i64, b: i64) -> Result<i64> {
    a.checked_add(b)
        .ok_or_else(|| Error::Validation("Amount overflows 64-bit minor units".to_string()))
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct TellerHandle {
    sender: mpsc::Sender<TellerMessage>,
}

impl TellerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<TellerMessage>) -> Self {
        Self { sender }
    }

    async fn submit<T>(
        &self,
        msg: TellerMessage,
        rx: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| Error::Queue("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Queue("Reply channel closed".to_string()))?
    }

    /// Create a user
    pub async fn create_user(&self, name: String) -> Result<Uuid> {
        let (tx, rx) = oneshot::channel();
        self.submit(TellerMessage::CreateUser { name, reply: tx }, rx).await
    }

    /// Delete a user
    pub async fn delete_user(&self, user_id: Uuid) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(TellerMessage::DeleteUser { user_id, reply: tx }, rx).await
    }

    /// Deposit funds
    pub async fn deposit(&self, user_id: Uuid, amount: i64, currency: Currency) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(
            TellerMessage::Deposit {
                user_id,
                amount,
                currency,
                reply: tx,
            },
            rx,
        )
        .await
    }

    /// Withdraw funds
    pub async fn withdraw(&self, user_id: Uuid, amount: i64, currency: Currency) -> Result<i64> {
        let (tx, rx) = oneshot::channel();
        self.submit(
            TellerMessage::Withdraw {
                user_id,
                amount,
                currency,
                reply: tx,
            },
            rx,
        )
        .await
    }

    /// Transfer funds between users
    pub async fn transfer(
        &self,
        issuer_id: Uuid,
        recipient_id: Uuid,
        amount: i64,
        currency: Currency,
    ) -> Result<i64> {
        let (tx, rx) = oneshot::channel();
        self.submit(
            TellerMessage::Transfer {
                issuer_id,
                recipient_id,
                amount,
                currency,
                reply: tx,
            },
            rx,
        )
        .await
    }

    /// Exchange between two currencies of one user
    pub async fn exchange(
        &self,
        user_id: Uuid,
        amount: i64,
        from: Currency,
        to: Currency,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(
            TellerMessage::Exchange {
                user_id,
                amount,
                from,
                to,
                reply: tx,
            },
            rx,
        )
        .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(TellerMessage::Shutdown)
            .await
            .map_err(|_| Error::Queue("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the teller actor
pub fn spawn_teller_actor(store: Store, policy: ExchangePolicy, metrics: Metrics) -> TellerHandle {
    let (tx, rx) = mpsc::channel(1024); // Bounded channel for backpressure
    let actor = TellerActor::new(store, policy, metrics, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    TellerHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    async fn spawn_test_actor() -> (TellerHandle, Store, ExchangePolicy) {
        let config = Config::default();
        let store = Store::open(&config).await.unwrap();
        let policy = ExchangePolicy::from_config(&config).unwrap();
        let handle = spawn_teller_actor(store.clone(), policy.clone(), Metrics::new().unwrap());
        (handle, store, policy)
    }

    #[tokio::test]
    async fn test_create_user_creates_all_accounts() {
        let (handle, store, _) = spawn_test_actor().await;

        let user_id = handle.create_user("alice".to_string()).await.unwrap();

        let accounts = store.accounts(user_id).await.unwrap();
        assert_eq!(accounts.len(), Currency::ALL.len());
        assert!(accounts.iter().all(|a| a.balance == 0));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_deposit_charges_fee_once() {
        let (handle, store, policy) = spawn_test_actor().await;
        let user_id = handle.create_user("alice".to_string()).await.unwrap();

        handle.deposit(user_id, 1000, Currency::PLN).await.unwrap();

        let account = store.account(user_id, Currency::PLN).await.unwrap().unwrap();
        assert_eq!(account.balance, 950);
        assert!((policy.collected_fees() - 50.0).abs() < 1e-9);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejection_leaves_no_trace() {
        let (handle, store, policy) = spawn_test_actor().await;
        let user_id = handle.create_user("alice".to_string()).await.unwrap();

        let result = handle.withdraw(user_id, 100, Currency::PLN).await;
        assert!(matches!(result, Err(Error::InsufficientFunds { .. })));

        let account = store.account(user_id, Currency::PLN).await.unwrap().unwrap();
        assert_eq!(account.balance, 0);
        assert_eq!(policy.collected_fees(), 0.0);

        // The queue keeps processing after a failed operation
        handle.deposit(user_id, 100, Currency::PLN).await.unwrap();

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_deposit_overflow_is_rejected() {
        let (handle, store, _) = spawn_test_actor().await;
        let user_id = handle.create_user("alice".to_string()).await.unwrap();

        handle.deposit(user_id, i64::MAX, Currency::PLN).await.unwrap();
        let before = store.account(user_id, Currency::PLN).await.unwrap().unwrap();

        // A second near-max deposit would wrap the balance
        let result = handle.deposit(user_id, i64::MAX, Currency::PLN).await;
        assert!(matches!(result, Err(Error::Validation(_))));

        let after = store.account(user_id, Currency::PLN).await.unwrap().unwrap();
        assert_eq!(after.balance, before.balance);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_rejects_sub_unit_result() {
        let (handle, store, policy) = spawn_test_actor().await;
        let user_id = handle.create_user("alice".to_string()).await.unwrap();
        handle.deposit(user_id, 1000, Currency::PLN).await.unwrap();
        let fees_before = policy.collected_fees();

        // 1 PLN minor unit converts to 0.25 USD units, rounding to nothing
        let result = handle.exchange(user_id, 1, Currency::PLN, Currency::USD).await;
        assert!(matches!(result, Err(Error::Validation(_))));

        let pln = store.account(user_id, Currency::PLN).await.unwrap().unwrap();
        let usd = store.account(user_id, Currency::USD).await.unwrap().unwrap();
        assert_eq!(pln.balance, 950);
        assert_eq!(usd.balance, 0);
        assert_eq!(policy.collected_fees(), fees_before);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_deposit_to_unknown_user_fails() {
        let (handle, _, _) = spawn_test_actor().await;

        let result = handle.deposit(Uuid::new_v4(), 100, Currency::PLN).await;
        assert!(matches!(result, Err(Error::AccountNotFound { .. })));

        handle.shutdown().await.unwrap();
    }
}
