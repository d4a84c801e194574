//! Storage gateway over SQLite
//!
//! # Schema
//!
//! - `users` - registered users (key: uuid)
//! - `accounts` - one row per (user, currency), UNIQUE on the pair,
//!   deleted by cascade with the owning user
//! - `transactions` - append-only operation log; carries no foreign
//!   key to `users` so audit history survives user deletion
//!
//! The pool is capped at one connection, so at most one storage
//! transaction can ever be open. Mutating callers must finish their
//! reads before calling [`Store::begin`].

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, Transaction};
use std::str::FromStr;
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    types::{Account, Currency, HistoryFilter, ProfitFilter, TransactionKind, TransactionRecord, User},
    Config,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id BLOB PRIMARY KEY,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS accounts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        currency TEXT NOT NULL,
        balance INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        UNIQUE (user_id, currency)
    )",
    "CREATE TABLE IF NOT EXISTS transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id BLOB NOT NULL,
        target_user_id BLOB,
        issuer_account_id INTEGER NOT NULL,
        recipient_account_id INTEGER,
        kind TEXT NOT NULL,
        amount INTEGER NOT NULL,
        currency TEXT NOT NULL,
        target_currency TEXT,
        fee_paid INTEGER NOT NULL,
        made_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_target ON transactions(target_user_id)",
];

const RECORD_COLUMNS: &str = "id, user_id, target_user_id, issuer_account_id, \
     recipient_account_id, kind, amount, currency, target_currency, fee_paid, made_at";

/// Storage wrapper for SQLite
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open or create the database and apply the schema
    pub async fn open(config: &Config) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // One connection: keeps the in-memory database alive and
        // guarantees a single open transaction at a time.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        tracing::info!(database_url = %config.database_url, "Opened SQLite store");

        Ok(Self { pool })
    }

    /// Begin a storage transaction (`BEGIN`); commit explicitly,
    /// rollback happens on drop
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    // User operations

    /// Insert a user row
    pub async fn insert_user(&self, conn: &mut SqliteConnection, user: &User) -> Result<()> {
        sqlx::query("INSERT INTO users (id, name, created_at) VALUES (?1, ?2, ?3)")
            .bind(user.id)
            .bind(&user.name)
            .bind(user.created_at)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Get a user by ID
    pub async fn user(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, name, created_at FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Delete a user; accounts cascade, the transaction log stays.
    /// Deleting an unknown ID is a no-op.
    pub async fn delete_user(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // Account operations

    /// Insert a zero-balance account row
    pub async fn insert_account(
        &self,
        conn: &mut SqliteConnection,
        user_id: Uuid,
        currency: Currency,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO accounts (user_id, currency, balance, created_at) VALUES (?1, ?2, 0, ?3)",
        )
        .bind(user_id)
        .bind(currency.code())
        .bind(created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Get the account for a (user, currency) pair
    pub async fn account(&self, user_id: Uuid, currency: Currency) -> Result<Option<Account>> {
        let row = sqlx::query(
            "SELECT id, user_id, currency, balance, created_at FROM accounts \
             WHERE user_id = ?1 AND currency = ?2",
        )
        .bind(user_id)
        .bind(currency.code())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    /// Get all accounts of a user
    pub async fn accounts(&self, user_id: Uuid) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            "SELECT id, user_id, currency, balance, created_at FROM accounts \
             WHERE user_id = ?1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(account_from_row).collect()
    }

    /// Overwrite an account balance
    pub async fn update_balance(
        &self,
        conn: &mut SqliteConnection,
        account_id: i64,
        balance: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE accounts SET balance = ?1 WHERE id = ?2")
            .bind(balance)
            .bind(account_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    // Transaction log operations

    /// Append one log record; `record.id` is assigned by storage and
    /// ignored on input
    pub async fn insert_record(
        &self,
        conn: &mut SqliteConnection,
        record: &TransactionRecord,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO transactions (user_id, target_user_id, issuer_account_id, \
             recipient_account_id, kind, amount, currency, target_currency, fee_paid, made_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(record.user_id)
        .bind(record.target_user_id)
        .bind(record.issuer_account_id)
        .bind(record.recipient_account_id)
        .bind(record.kind.as_str())
        .bind(record.amount)
        .bind(record.currency.code())
        .bind(record.target_currency.map(|c| c.code()))
        .bind(record.fee_paid)
        .bind(record.made_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Filtered scan of the log; every filter field is optional and
    /// conjunctive, ranges inclusive
    pub async fn history(&self, filter: &HistoryFilter) -> Result<Vec<TransactionRecord>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM transactions WHERE 1 = 1",
            RECORD_COLUMNS
        ));

        if let Some(user_id) = filter.user_id {
            query.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(currency) = filter.currency {
            query.push(" AND currency = ").push_bind(currency.code());
        }
        if let Some(min) = filter.min_amount {
            query.push(" AND amount >= ").push_bind(min);
        }
        if let Some(max) = filter.max_amount {
            query.push(" AND amount <= ").push_bind(max);
        }
        if let Some(kind) = filter.kind {
            query.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(from) = filter.from {
            query.push(" AND made_at >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            query.push(" AND made_at <= ").push_bind(to);
        }
        query.push(" ORDER BY id");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Records where the user is the issuer, or the named counterparty
    /// of a transfer
    pub async fn history_for_party(
        &self,
        user_id: Uuid,
        filter: &ProfitFilter,
    ) -> Result<Vec<TransactionRecord>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM transactions WHERE (user_id = ",
            RECORD_COLUMNS
        ));
        query.push_bind(user_id);
        query.push(" OR (kind = 'transfer' AND target_user_id = ");
        query.push_bind(user_id);
        query.push("))");

        if let Some(kind) = filter.kind {
            query.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(from) = filter.from {
            query.push(" AND made_at >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            query.push(" AND made_at <= ").push_bind(to);
        }
        query.push(" ORDER BY id");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }
}

// Row decoding

fn decode_currency(code: &str) -> Result<Currency> {
    Currency::from_code(code).ok_or_else(|| Error::Storage(format!("Unknown currency in row: {}", code)))
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
    })
}

fn account_from_row(row: &SqliteRow) -> Result<Account> {
    let code: String = row.try_get("currency")?;
    Ok(Account {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        currency: decode_currency(&code)?,
        balance: row.try_get("balance")?,
        created_at: row.try_get("created_at")?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<TransactionRecord> {
    let kind: String = row.try_get("kind")?;
    let currency: String = row.try_get("currency")?;
    let target_currency: Option<String> = row.try_get("target_currency")?;

    Ok(TransactionRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        target_user_id: row.try_get("target_user_id")?,
        issuer_account_id: row.try_get("issuer_account_id")?,
        recipient_account_id: row.try_get("recipient_account_id")?,
        kind: TransactionKind::from_str(&kind)
            .ok_or_else(|| Error::Storage(format!("Unknown transaction kind in row: {}", kind)))?,
        amount: row.try_get("amount")?,
        currency: decode_currency(&currency)?,
        target_currency: target_currency.as_deref().map(decode_currency).transpose()?,
        fee_paid: row.try_get("fee_paid")?,
        made_at: row.try_get("made_at")?,
    })
}
