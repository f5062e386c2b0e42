//! Postgres-backed ledger store.
//!
//! Each contract method issues one statement against the transaction's
//! connection; row locks taken by `UPDATE ... SET balance = balance + $1`
//! are held until the transaction commits or rolls back, which is what the
//! coordinator's lock-ordering rule relies on.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | RowNotFound | N/A | `NotFound` | Referenced id does not exist |
//! | Database (unique violation) | `23505` | `UniqueViolation` | Duplicate key |
//! | Database (foreign key violation) | `23503` | `ForeignKeyViolation` | Entry/transfer referencing a missing account |
//! | Database (check constraint violation) | `23514` | `CheckViolation` | Invalid data (e.g. non-positive transfer amount) |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed / network / decode | N/A | `Backend` | Connection failures etc. |
//!
//! ## Thread Safety
//!
//! `PgLedgerStore` is `Send + Sync` and cheap to clone; all operations go
//! through the SQLx connection pool, which is injected at construction and
//! never reached through ambient state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use coffer_core::{
    Account, AccountId, Currency, Entry, EntryId, NewAccount, NewEntry, NewTransfer, Transfer,
    TransferId,
};

use super::r#trait::{LedgerStore, LedgerTx, StoreError};

/// Postgres-backed ledger store. Holds an injected connection pool.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Wrap an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database named by `database_url` and wrap the pool.
    ///
    /// Callers typically read the URL from the environment; this crate takes
    /// it explicitly.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }
}

/// A transaction-bound handle over a dedicated pool connection.
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> Result<PgLedgerTx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PgLedgerTx { tx })
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        fetch_account(&self.pool, id).await
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry, StoreError> {
        fetch_entry(&self.pool, id).await
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, StoreError> {
        fetch_transfer(&self.pool, id).await
    }
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn create_account(&mut self, params: NewAccount) -> Result<Account, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO accounts (id, owner, balance, currency, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(AccountId::new().as_uuid())
        .bind(&params.owner)
        .bind(params.balance)
        .bind(params.currency.code())
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("create_account", e))?;

        account_from_row(&row)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account, StoreError> {
        fetch_account(&mut *self.tx, id).await
    }

    async fn list_accounts(
        &mut self,
        owner: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, balance, currency, created_at
            FROM accounts
            WHERE owner = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(owner)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_accounts", e))?;

        rows.iter().map(account_from_row).collect()
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, StoreError> {
        // This statement takes (and holds) the row lock.
        let row = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = balance + $1
            WHERE id = $2
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(delta)
        .bind(id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("add_account_balance", e))?;

        account_from_row(&row)
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn delete_account(&mut self, id: AccountId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_account", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn create_entry(&mut self, params: NewEntry) -> Result<Entry, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO entries (id, account_id, amount, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(EntryId::new().as_uuid())
        .bind(params.account_id.as_uuid())
        .bind(params.amount)
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("create_entry", e))?;

        entry_from_row(&row)
    }

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry, StoreError> {
        fetch_entry(&mut *self.tx, id).await
    }

    async fn list_account_entries(
        &mut self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Entry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, amount, created_at
            FROM entries
            WHERE account_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id.as_uuid())
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_account_entries", e))?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn delete_account_entries(&mut self, account_id: AccountId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM entries WHERE account_id = $1")
            .bind(account_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_account_entries", e))?;

        Ok(result.rows_affected())
    }

    async fn create_transfer(&mut self, params: NewTransfer) -> Result<Transfer, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO transfers (id, from_account_id, to_account_id, amount, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, from_account_id, to_account_id, amount, created_at
            "#,
        )
        .bind(TransferId::new().as_uuid())
        .bind(params.from_account_id.as_uuid())
        .bind(params.to_account_id.as_uuid())
        .bind(params.amount)
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("create_transfer", e))?;

        transfer_from_row(&row)
    }

    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer, StoreError> {
        fetch_transfer(&mut *self.tx, id).await
    }

    async fn list_account_transfers(
        &mut self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transfer>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE from_account_id = $1 OR to_account_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id.as_uuid())
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_account_transfers", e))?;

        rows.iter().map(transfer_from_row).collect()
    }

    async fn delete_account_transfers(
        &mut self,
        account_id: AccountId,
    ) -> Result<u64, StoreError> {
        // Both roles: the account may be the source or the destination.
        let result =
            sqlx::query("DELETE FROM transfers WHERE from_account_id = $1 OR to_account_id = $1")
                .bind(account_id.as_uuid())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("delete_account_transfers", e))?;

        Ok(result.rows_affected())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback_transaction", e))
    }
}

async fn fetch_account<'e, E>(executor: E, id: AccountId) -> Result<Account, StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        SELECT id, owner, balance, currency, created_at
        FROM accounts
        WHERE id = $1
        "#,
    )
    .bind(id.as_uuid())
    .fetch_one(executor)
    .await
    .map_err(|e| map_sqlx_error("get_account", e))?;

    account_from_row(&row)
}

async fn fetch_entry<'e, E>(executor: E, id: EntryId) -> Result<Entry, StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        SELECT id, account_id, amount, created_at
        FROM entries
        WHERE id = $1
        "#,
    )
    .bind(id.as_uuid())
    .fetch_one(executor)
    .await
    .map_err(|e| map_sqlx_error("get_entry", e))?;

    entry_from_row(&row)
}

async fn fetch_transfer<'e, E>(executor: E, id: TransferId) -> Result<Transfer, StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        SELECT id, from_account_id, to_account_id, amount, created_at
        FROM transfers
        WHERE id = $1
        "#,
    )
    .bind(id.as_uuid())
    .fetch_one(executor)
    .await
    .map_err(|e| map_sqlx_error("get_transfer", e))?;

    transfer_from_row(&row)
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation(msg),
                Some("23503") => StoreError::ForeignKeyViolation(msg),
                Some("23514") => StoreError::CheckViolation(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

// SQLx row decoding

#[derive(Debug)]
struct AccountRow {
    id: uuid::Uuid,
    owner: String,
    balance: i64,
    currency: String,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AccountRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            id: row.try_get("id")?,
            owner: row.try_get("owner")?,
            balance: row.try_get("balance")?,
            currency: row.try_get("currency")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let row = AccountRow::from_row(row)
        .map_err(|e| StoreError::Backend(format!("failed to decode account row: {e}")))?;

    let currency: Currency = row
        .currency
        .parse()
        .map_err(|e| StoreError::Backend(format!("invalid currency column: {e}")))?;

    Ok(Account {
        id: AccountId::from_uuid(row.id),
        owner: row.owner,
        balance: row.balance,
        currency,
        created_at: row.created_at,
    })
}

fn entry_from_row(row: &PgRow) -> Result<Entry, StoreError> {
    let decode = |e| StoreError::Backend(format!("failed to decode entry row: {e}"));
    Ok(Entry {
        id: EntryId::from_uuid(row.try_get("id").map_err(decode)?),
        account_id: AccountId::from_uuid(row.try_get("account_id").map_err(decode)?),
        amount: row.try_get("amount").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

fn transfer_from_row(row: &PgRow) -> Result<Transfer, StoreError> {
    let decode = |e| StoreError::Backend(format!("failed to decode transfer row: {e}"));
    Ok(Transfer {
        id: TransferId::from_uuid(row.try_get("id").map_err(decode)?),
        from_account_id: AccountId::from_uuid(row.try_get("from_account_id").map_err(decode)?),
        to_account_id: AccountId::from_uuid(row.try_get("to_account_id").map_err(decode)?),
        amount: row.try_get("amount").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}
