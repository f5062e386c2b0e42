//! In-memory ledger store.
//!
//! Intended for tests/dev. Not optimized for performance: one async mutex
//! guards all three tables, and a transaction holds it from `begin` until
//! commit/rollback, so transactions are serializable by construction.
//! Rollback restores a snapshot taken at `begin`.
//!
//! Referential checks mirror the Postgres schema's foreign keys so that the
//! coordinator sees the same `StoreError` kinds against either backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use coffer_core::{
    Account, AccountId, Entry, EntryId, NewAccount, NewEntry, NewTransfer, Transfer, TransferId,
};

use super::r#trait::{LedgerStore, LedgerTx, StoreError};

/// Sentinel: no balance-adjustment faults armed.
const FAULTS_DISABLED: i64 = i64::MIN;

#[derive(Debug, Clone, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
}

/// In-memory ledger store for tests/dev.
#[derive(Debug, Clone)]
pub struct MemLedgerStore {
    tables: Arc<Mutex<Tables>>,
    balance_faults: Arc<AtomicI64>,
}

impl Default for MemLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemLedgerStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            balance_faults: Arc::new(AtomicI64::new(FAULTS_DISABLED)),
        }
    }

    /// Arm a fault: the next `successes` balance adjustments succeed, the one
    /// after that fails with `StoreError::Backend`. Used to exercise rollback
    /// of partially applied transfers.
    pub fn fail_balance_adjustments_after(&self, successes: i64) {
        self.balance_faults.store(successes, Ordering::SeqCst);
    }
}

/// Transaction-bound handle; owns the table lock until commit/rollback.
///
/// Dropping the handle without an explicit `commit` restores the snapshot,
/// matching `sqlx::Transaction`'s rollback-on-drop: a panic unwinding
/// through a transaction scope never publishes partial writes.
pub struct MemLedgerTx {
    guard: OwnedMutexGuard<Tables>,
    snapshot: Tables,
    committed: bool,
    balance_faults: Arc<AtomicI64>,
}

impl Drop for MemLedgerTx {
    fn drop(&mut self) {
        if !self.committed {
            *self.guard = std::mem::take(&mut self.snapshot);
        }
    }
}

#[async_trait]
impl LedgerStore for MemLedgerStore {
    type Tx = MemLedgerTx;

    async fn begin(&self) -> Result<MemLedgerTx, StoreError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let snapshot = guard.clone();
        Ok(MemLedgerTx {
            guard,
            snapshot,
            committed: false,
            balance_faults: Arc::clone(&self.balance_faults),
        })
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        let tables = self.tables.lock().await;
        tables.accounts.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry, StoreError> {
        let tables = self.tables.lock().await;
        tables.entries.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, StoreError> {
        let tables = self.tables.lock().await;
        tables.transfers.get(&id).cloned().ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl LedgerTx for MemLedgerTx {
    async fn create_account(&mut self, params: NewAccount) -> Result<Account, StoreError> {
        let account = Account {
            id: AccountId::new(),
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: Utc::now(),
        };
        if self.guard.accounts.contains_key(&account.id) {
            return Err(StoreError::UniqueViolation(format!(
                "duplicate account id {}",
                account.id
            )));
        }
        self.guard.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account, StoreError> {
        self.guard.accounts.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn list_accounts(
        &mut self,
        owner: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Account>, StoreError> {
        Ok(self
            .guard
            .accounts
            .values()
            .filter(|a| a.owner == owner)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, StoreError> {
        if self.balance_faults.load(Ordering::SeqCst) != FAULTS_DISABLED
            && self.balance_faults.fetch_sub(1, Ordering::SeqCst) <= 0
        {
            return Err(StoreError::Backend(
                "injected balance-adjustment fault".to_string(),
            ));
        }

        let account = self
            .guard
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::NotFound)?;
        account.balance += delta;
        Ok(account.clone())
    }

    async fn delete_account(&mut self, id: AccountId) -> Result<(), StoreError> {
        let has_dependents = self.guard.entries.values().any(|e| e.account_id == id)
            || self
                .guard
                .transfers
                .values()
                .any(|t| t.from_account_id == id || t.to_account_id == id);
        if has_dependents {
            return Err(StoreError::ForeignKeyViolation(format!(
                "account {id} still has ledger rows"
            )));
        }

        self.guard
            .accounts
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn create_entry(&mut self, params: NewEntry) -> Result<Entry, StoreError> {
        if !self.guard.accounts.contains_key(&params.account_id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "entry references missing account {}",
                params.account_id
            )));
        }

        let entry = Entry {
            id: EntryId::new(),
            account_id: params.account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.guard.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry, StoreError> {
        self.guard.entries.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn list_account_entries(
        &mut self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Entry>, StoreError> {
        Ok(self
            .guard
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn delete_account_entries(&mut self, account_id: AccountId) -> Result<u64, StoreError> {
        let before = self.guard.entries.len();
        self.guard.entries.retain(|_, e| e.account_id != account_id);
        Ok((before - self.guard.entries.len()) as u64)
    }

    async fn create_transfer(&mut self, params: NewTransfer) -> Result<Transfer, StoreError> {
        for account_id in [params.from_account_id, params.to_account_id] {
            if !self.guard.accounts.contains_key(&account_id) {
                return Err(StoreError::ForeignKeyViolation(format!(
                    "transfer references missing account {account_id}"
                )));
            }
        }

        let transfer = Transfer {
            id: TransferId::new(),
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.guard.transfers.insert(transfer.id, transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer, StoreError> {
        self.guard.transfers.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn list_account_transfers(
        &mut self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transfer>, StoreError> {
        Ok(self
            .guard
            .transfers
            .values()
            .filter(|t| t.from_account_id == account_id || t.to_account_id == account_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn delete_account_transfers(
        &mut self,
        account_id: AccountId,
    ) -> Result<u64, StoreError> {
        let before = self.guard.transfers.len();
        self.guard
            .transfers
            .retain(|_, t| t.from_account_id != account_id && t.to_account_id != account_id);
        Ok((before - self.guard.transfers.len()) as u64)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        // Writes were applied in place under the lock; disarming the drop
        // guard makes them visible to the next transaction.
        self.committed = true;
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        *self.guard = std::mem::take(&mut self.snapshot);
        self.committed = true;
        Ok(())
    }
}
