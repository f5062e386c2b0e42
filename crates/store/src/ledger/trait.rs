use async_trait::async_trait;
use thiserror::Error;

use coffer_core::{
    Account, AccountId, Entry, EntryId, NewAccount, NewEntry, NewTransfer, Transfer, TransferId,
};

/// Data-access operation error.
///
/// A closed enumeration of storage failure kinds. Callers dispatch by
/// structured match; no backend error type ever crosses this boundary.
///
/// ## Error Categories
///
/// - **NotFound**: a referenced row does not exist
/// - **UniqueViolation**: a unique constraint rejected a write
/// - **ForeignKeyViolation**: a write referenced a missing parent row
/// - **CheckViolation**: a check constraint rejected a write
/// - **Backend**: driver/connection-level failure (network, pool, decode)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    #[error("check constraint violated: {0}")]
    CheckViolation(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Transaction-bound data-access handle.
///
/// Every method issues exactly one statement against the transaction's
/// connection. Writes become visible to other transactions only after
/// `commit`; `rollback` discards all of them. Multi-statement consistency
/// (e.g. "a transfer and both its entries exist together") is the
/// coordinator's job, not this trait's.
#[async_trait]
pub trait LedgerTx: Send {
    /// Insert an account row and return it.
    async fn create_account(&mut self, params: NewAccount) -> Result<Account, StoreError>;

    /// Fetch one account by id.
    async fn get_account(&mut self, id: AccountId) -> Result<Account, StoreError>;

    /// List accounts for an owner, paginated in ascending id order (UUIDv7
    /// ids, so oldest first).
    async fn list_accounts(
        &mut self,
        owner: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Account>, StoreError>;

    /// Adjust an account balance by a signed delta and return the updated row.
    ///
    /// The row lock taken by this statement is the mutual-exclusion point for
    /// concurrent transfers; the store holds it until commit/rollback.
    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, StoreError>;

    /// Delete one account row. Fails with `NotFound` if the id is unknown and
    /// with `ForeignKeyViolation` while dependent ledger rows still exist.
    async fn delete_account(&mut self, id: AccountId) -> Result<(), StoreError>;

    /// Insert a ledger entry and return it.
    async fn create_entry(&mut self, params: NewEntry) -> Result<Entry, StoreError>;

    /// Fetch one entry by id.
    async fn get_entry(&mut self, id: EntryId) -> Result<Entry, StoreError>;

    /// List entries recorded against an account.
    async fn list_account_entries(
        &mut self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Entry>, StoreError>;

    /// Delete all entries belonging to an account. Returns the rows removed
    /// (zero is not an error).
    async fn delete_account_entries(&mut self, account_id: AccountId) -> Result<u64, StoreError>;

    /// Insert a transfer record and return it.
    async fn create_transfer(&mut self, params: NewTransfer) -> Result<Transfer, StoreError>;

    /// Fetch one transfer by id.
    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer, StoreError>;

    /// List transfers referencing an account as source **or** destination.
    async fn list_account_transfers(
        &mut self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transfer>, StoreError>;

    /// Delete all transfers referencing an account as source **or**
    /// destination. Returns the rows removed (zero is not an error).
    async fn delete_account_transfers(&mut self, account_id: AccountId)
        -> Result<u64, StoreError>;

    /// Make every write issued through this handle durable.
    async fn commit(self) -> Result<(), StoreError>;

    /// Discard every write issued through this handle.
    async fn rollback(self) -> Result<(), StoreError>;
}

/// Handle to the ledger store.
///
/// Implementations own their connection state (e.g. a pool) and hand out
/// independent transaction-bound handles; nothing here is process-global.
/// A handle is cheap to clone and safe to share across tasks.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: LedgerTx;

    /// Begin a transactional unit of work.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Autocommit read of one account (outside any transaction scope).
    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError>;

    /// Autocommit read of one entry.
    async fn get_entry(&self, id: EntryId) -> Result<Entry, StoreError>;

    /// Autocommit read of one transfer.
    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, StoreError>;
}
