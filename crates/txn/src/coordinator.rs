//! The transaction coordinator.
//!
//! Composes multiple data-access calls inside one transaction scope to
//! implement the two ledger operations no single CRUD call can make safe on
//! its own: moving money between two accounts and cascading an account
//! deletion. The coordinator holds a store handle by explicit composition;
//! it exposes only its own operations, never the store's CRUD surface.

use tracing::instrument;

use coffer_core::{Account, AccountId, Entry, NewEntry, NewTransfer, Transfer};
use coffer_store::{LedgerStore, LedgerTx, StoreError};

use crate::error::TxError;

/// Parameters of a coordinated money movement.
///
/// Preconditions are the caller's responsibility and are not re-checked here:
/// `amount > 0`, both accounts exist, currencies match, and the source holds
/// sufficient balance. The coordinator's job is atomicity and ordering, not
/// policy validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

/// Everything a committed transfer produced: the transfer record, both
/// updated accounts, and the paired debit/credit entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}

/// Transaction coordinator over a ledger store.
///
/// Each operation opens its own transaction scope; scopes are never shared
/// across concurrent invocations, and no in-process locks are taken — mutual
/// exclusion is delegated to the store's row locking plus the fixed
/// lock-ordering rule in [`TxCoordinator::transfer_money`].
#[derive(Debug, Clone)]
pub struct TxCoordinator<S> {
    store: S,
}

impl<S: LedgerStore> TxCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Run `work` inside one atomic unit against the store.
    ///
    /// Begins a transaction, invokes `work` exactly once with the
    /// transaction-bound handle, commits on success and rolls back on
    /// failure. A rollback failure never swallows the original cause: both
    /// are carried in [`TxError::RollbackFailed`]. No nesting; one call to
    /// this primitive is one atomic unit.
    pub async fn run_in_transaction<T, F>(&self, work: F) -> Result<T, TxError>
    where
        F: AsyncFnOnce(&mut S::Tx) -> Result<T, StoreError>,
    {
        let mut tx = self.store.begin().await?;
        match work(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(cause) => match tx.rollback().await {
                Ok(()) => Err(TxError::Aborted(cause)),
                Err(rollback) => Err(TxError::RollbackFailed { cause, rollback }),
            },
        }
    }

    /// Move `amount` between two accounts as one atomic unit.
    ///
    /// Creates the transfer record, the debit entry on the source, the credit
    /// entry on the destination, and applies both balance deltas. The triple
    /// commits or vanishes together; no partial state is ever observable.
    #[instrument(
        skip(self),
        fields(
            from_account_id = %params.from_account_id,
            to_account_id = %params.to_account_id,
            amount = params.amount,
        ),
        err
    )]
    pub async fn transfer_money(&self, params: TransferParams) -> Result<TransferOutcome, TxError> {
        self.run_in_transaction(async |tx| {
            let transfer = tx
                .create_transfer(NewTransfer {
                    from_account_id: params.from_account_id,
                    to_account_id: params.to_account_id,
                    amount: params.amount,
                })
                .await?;

            let from_entry = tx
                .create_entry(NewEntry {
                    account_id: params.from_account_id,
                    amount: -params.amount,
                })
                .await?;

            let to_entry = tx
                .create_entry(NewEntry {
                    account_id: params.to_account_id,
                    amount: params.amount,
                })
                .await?;

            // Always adjust the account with the lower id first, regardless
            // of transfer direction. Two concurrent opposite-direction
            // transfers over the same pair then take their row locks in the
            // same relative order, so no circular wait can form.
            let (from_account, to_account) = if params.from_account_id < params.to_account_id {
                apply_deltas(
                    tx,
                    params.from_account_id,
                    -params.amount,
                    params.to_account_id,
                    params.amount,
                )
                .await?
            } else {
                let (to_account, from_account) = apply_deltas(
                    tx,
                    params.to_account_id,
                    params.amount,
                    params.from_account_id,
                    -params.amount,
                )
                .await?;
                (from_account, to_account)
            };

            Ok(TransferOutcome {
                transfer,
                from_account,
                to_account,
                from_entry,
                to_entry,
            })
        })
        .await
    }

    /// Delete an account together with every ledger row referencing it.
    ///
    /// Entries belonging to the account and transfers referencing it in
    /// either role are removed before the account row itself (dependents
    /// first). All three deletions succeed or none do; a single account is
    /// the sole lock subject, so no ordering rule is needed here.
    #[instrument(skip(self), fields(account_id = %account_id), err)]
    pub async fn delete_account_cascade(&self, account_id: AccountId) -> Result<(), TxError> {
        self.run_in_transaction(async |tx| {
            tx.delete_account_entries(account_id).await?;
            tx.delete_account_transfers(account_id).await?;
            tx.delete_account(account_id).await?;
            Ok(())
        })
        .await
    }
}

/// Apply two balance deltas in the given order.
///
/// The caller has already sorted the pair into lock order; this helper only
/// keeps the two `add_account_balance` calls in one place.
async fn apply_deltas<T: LedgerTx>(
    tx: &mut T,
    first_id: AccountId,
    first_delta: i64,
    second_id: AccountId,
    second_delta: i64,
) -> Result<(Account, Account), StoreError> {
    let first = tx.add_account_balance(first_id, first_delta).await?;
    let second = tx.add_account_balance(second_id, second_delta).await?;
    Ok((first, second))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use proptest::prelude::*;

    use coffer_core::{Currency, EntryId, NewAccount, TransferId};
    use coffer_store::MemLedgerStore;
    use coffer_store::ledger::in_memory::MemLedgerTx;

    use super::*;

    async fn seed_account(store: &MemLedgerStore, owner: &str, balance: i64) -> Account {
        let mut tx = store.begin().await.unwrap();
        let account = tx
            .create_account(NewAccount {
                owner: owner.to_string(),
                balance,
                currency: Currency::Usd,
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        account
    }

    #[tokio::test]
    async fn scope_commits_on_success() {
        let store = MemLedgerStore::new();
        let coordinator = TxCoordinator::new(store.clone());

        let account = coordinator
            .run_in_transaction(async |tx| {
                tx.create_account(NewAccount {
                    owner: "alice".to_string(),
                    balance: 10,
                    currency: Currency::Usd,
                })
                .await
            })
            .await
            .unwrap();

        assert_eq!(store.get_account(account.id).await.unwrap(), account);
    }

    #[tokio::test]
    async fn scope_rolls_back_on_failure_and_keeps_the_cause() {
        let store = MemLedgerStore::new();
        let coordinator = TxCoordinator::new(store.clone());

        let mut created_id = None;
        let err = coordinator
            .run_in_transaction(async |tx| {
                let account = tx
                    .create_account(NewAccount {
                        owner: "alice".to_string(),
                        balance: 10,
                        currency: Currency::Usd,
                    })
                    .await?;
                created_id = Some(account.id);
                Err::<(), _>(StoreError::NotFound)
            })
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        let orphan = store.get_account(created_id.unwrap()).await;
        assert!(matches!(orphan, Err(StoreError::NotFound)));
    }

    // Stub store whose rollback always fails, for the composite error path.
    // No method besides begin/rollback is reachable in its tests.

    struct BrokenRollbackStore;

    struct BrokenRollbackTx;

    fn stub_failure() -> StoreError {
        StoreError::Backend("not exercised by this stub".to_string())
    }

    #[async_trait]
    impl LedgerStore for BrokenRollbackStore {
        type Tx = BrokenRollbackTx;

        async fn begin(&self) -> Result<BrokenRollbackTx, StoreError> {
            Ok(BrokenRollbackTx)
        }

        async fn get_account(&self, _id: AccountId) -> Result<Account, StoreError> {
            Err(stub_failure())
        }

        async fn get_entry(&self, _id: EntryId) -> Result<Entry, StoreError> {
            Err(stub_failure())
        }

        async fn get_transfer(&self, _id: TransferId) -> Result<Transfer, StoreError> {
            Err(stub_failure())
        }
    }

    #[async_trait]
    impl LedgerTx for BrokenRollbackTx {
        async fn create_account(&mut self, _params: NewAccount) -> Result<Account, StoreError> {
            Err(stub_failure())
        }

        async fn get_account(&mut self, _id: AccountId) -> Result<Account, StoreError> {
            Err(stub_failure())
        }

        async fn list_accounts(
            &mut self,
            _owner: &str,
            _limit: i64,
            _offset: i64,
        ) -> Result<Vec<Account>, StoreError> {
            Err(stub_failure())
        }

        async fn add_account_balance(
            &mut self,
            _id: AccountId,
            _delta: i64,
        ) -> Result<Account, StoreError> {
            Err(stub_failure())
        }

        async fn delete_account(&mut self, _id: AccountId) -> Result<(), StoreError> {
            Err(stub_failure())
        }

        async fn create_entry(&mut self, _params: NewEntry) -> Result<Entry, StoreError> {
            Err(stub_failure())
        }

        async fn get_entry(&mut self, _id: EntryId) -> Result<Entry, StoreError> {
            Err(stub_failure())
        }

        async fn list_account_entries(
            &mut self,
            _account_id: AccountId,
            _limit: i64,
            _offset: i64,
        ) -> Result<Vec<Entry>, StoreError> {
            Err(stub_failure())
        }

        async fn delete_account_entries(
            &mut self,
            _account_id: AccountId,
        ) -> Result<u64, StoreError> {
            Err(stub_failure())
        }

        async fn create_transfer(&mut self, _params: NewTransfer) -> Result<Transfer, StoreError> {
            Err(stub_failure())
        }

        async fn get_transfer(&mut self, _id: TransferId) -> Result<Transfer, StoreError> {
            Err(stub_failure())
        }

        async fn list_account_transfers(
            &mut self,
            _account_id: AccountId,
            _limit: i64,
            _offset: i64,
        ) -> Result<Vec<Transfer>, StoreError> {
            Err(stub_failure())
        }

        async fn delete_account_transfers(
            &mut self,
            _account_id: AccountId,
        ) -> Result<u64, StoreError> {
            Err(stub_failure())
        }

        async fn commit(self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn rollback(self) -> Result<(), StoreError> {
            Err(StoreError::Backend(
                "connection reset during rollback".to_string(),
            ))
        }
    }

    #[tokio::test]
    async fn failed_rollback_reports_both_causes() {
        let coordinator = TxCoordinator::new(BrokenRollbackStore);

        let err = coordinator
            .run_in_transaction(async |_tx| Err::<(), _>(StoreError::NotFound))
            .await
            .unwrap_err();

        match &err {
            TxError::RollbackFailed { cause, rollback } => {
                assert!(matches!(cause, StoreError::NotFound));
                assert!(matches!(rollback, StoreError::Backend(_)));
            }
            other => panic!("expected RollbackFailed, got {other:?}"),
        }

        let rendered = err.to_string();
        assert!(rendered.contains("not found"));
        assert!(rendered.contains("connection reset during rollback"));
    }

    // Recording store: logs the order in which balance adjustments are issued.

    #[derive(Clone)]
    struct RecordingStore {
        inner: MemLedgerStore,
        adjustments: Arc<Mutex<Vec<AccountId>>>,
    }

    struct RecordingTx {
        inner: MemLedgerTx,
        adjustments: Arc<Mutex<Vec<AccountId>>>,
    }

    #[async_trait]
    impl LedgerStore for RecordingStore {
        type Tx = RecordingTx;

        async fn begin(&self) -> Result<RecordingTx, StoreError> {
            Ok(RecordingTx {
                inner: self.inner.begin().await?,
                adjustments: Arc::clone(&self.adjustments),
            })
        }

        async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
            self.inner.get_account(id).await
        }

        async fn get_entry(&self, id: EntryId) -> Result<Entry, StoreError> {
            self.inner.get_entry(id).await
        }

        async fn get_transfer(&self, id: TransferId) -> Result<Transfer, StoreError> {
            self.inner.get_transfer(id).await
        }
    }

    #[async_trait]
    impl LedgerTx for RecordingTx {
        async fn create_account(&mut self, params: NewAccount) -> Result<Account, StoreError> {
            self.inner.create_account(params).await
        }

        async fn get_account(&mut self, id: AccountId) -> Result<Account, StoreError> {
            self.inner.get_account(id).await
        }

        async fn list_accounts(
            &mut self,
            owner: &str,
            limit: i64,
            offset: i64,
        ) -> Result<Vec<Account>, StoreError> {
            self.inner.list_accounts(owner, limit, offset).await
        }

        async fn add_account_balance(
            &mut self,
            id: AccountId,
            delta: i64,
        ) -> Result<Account, StoreError> {
            self.adjustments.lock().unwrap().push(id);
            self.inner.add_account_balance(id, delta).await
        }

        async fn delete_account(&mut self, id: AccountId) -> Result<(), StoreError> {
            self.inner.delete_account(id).await
        }

        async fn create_entry(&mut self, params: NewEntry) -> Result<Entry, StoreError> {
            self.inner.create_entry(params).await
        }

        async fn get_entry(&mut self, id: EntryId) -> Result<Entry, StoreError> {
            self.inner.get_entry(id).await
        }

        async fn list_account_entries(
            &mut self,
            account_id: AccountId,
            limit: i64,
            offset: i64,
        ) -> Result<Vec<Entry>, StoreError> {
            self.inner.list_account_entries(account_id, limit, offset).await
        }

        async fn delete_account_entries(
            &mut self,
            account_id: AccountId,
        ) -> Result<u64, StoreError> {
            self.inner.delete_account_entries(account_id).await
        }

        async fn create_transfer(&mut self, params: NewTransfer) -> Result<Transfer, StoreError> {
            self.inner.create_transfer(params).await
        }

        async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer, StoreError> {
            self.inner.get_transfer(id).await
        }

        async fn list_account_transfers(
            &mut self,
            account_id: AccountId,
            limit: i64,
            offset: i64,
        ) -> Result<Vec<Transfer>, StoreError> {
            self.inner.list_account_transfers(account_id, limit, offset).await
        }

        async fn delete_account_transfers(
            &mut self,
            account_id: AccountId,
        ) -> Result<u64, StoreError> {
            self.inner.delete_account_transfers(account_id).await
        }

        async fn commit(self) -> Result<(), StoreError> {
            self.inner.commit().await
        }

        async fn rollback(self) -> Result<(), StoreError> {
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn balance_adjustments_follow_ascending_id_order_in_both_directions() {
        let mem = MemLedgerStore::new();
        let first = seed_account(&mem, "alice", 1_000).await;
        let second = seed_account(&mem, "bob", 1_000).await;
        let (lo, hi) = if first.id < second.id {
            (first.id, second.id)
        } else {
            (second.id, first.id)
        };

        let adjustments = Arc::new(Mutex::new(Vec::new()));
        let coordinator = TxCoordinator::new(RecordingStore {
            inner: mem,
            adjustments: Arc::clone(&adjustments),
        });

        coordinator
            .transfer_money(TransferParams {
                from_account_id: lo,
                to_account_id: hi,
                amount: 10,
            })
            .await
            .unwrap();

        coordinator
            .transfer_money(TransferParams {
                from_account_id: hi,
                to_account_id: lo,
                amount: 10,
            })
            .await
            .unwrap();

        let log = adjustments.lock().unwrap();
        assert_eq!(log.as_slice(), [lo, hi, lo, hi]);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: for any sequence of transfers in either direction, the
        /// total balance across both accounts never changes.
        #[test]
        fn transfers_conserve_total_balance(
            moves in prop::collection::vec((1i64..1_000i64, any::<bool>()), 1..20)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            rt.block_on(async {
                let store = MemLedgerStore::new();
                let a = seed_account(&store, "alice", 1_000_000).await;
                let b = seed_account(&store, "bob", 1_000_000).await;
                let coordinator = TxCoordinator::new(store.clone());

                let mut expected_a = a.balance;
                let mut expected_b = b.balance;

                for (amount, a_to_b) in moves {
                    let (from, to) = if a_to_b { (a.id, b.id) } else { (b.id, a.id) };
                    coordinator
                        .transfer_money(TransferParams {
                            from_account_id: from,
                            to_account_id: to,
                            amount,
                        })
                        .await
                        .unwrap();

                    if a_to_b {
                        expected_a -= amount;
                        expected_b += amount;
                    } else {
                        expected_a += amount;
                        expected_b -= amount;
                    }
                }

                let final_a = store.get_account(a.id).await.unwrap().balance;
                let final_b = store.get_account(b.id).await.unwrap().balance;
                assert_eq!(final_a, expected_a);
                assert_eq!(final_b, expected_b);
                assert_eq!(final_a + final_b, a.balance + b.balance);
            });
        }
    }
}
