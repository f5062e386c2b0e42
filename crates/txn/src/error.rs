//! Coordinator error model.

use thiserror::Error;

use coffer_store::StoreError;

/// Failure of a coordinated unit of work.
///
/// The coordinator performs no local recovery or retries; atomicity comes
/// from rollback, not compensation. A caller may retry the whole operation
/// after an `Aborted` failure, since no partial state persists.
#[derive(Debug, Error)]
pub enum TxError {
    /// A data-access step inside the transaction scope failed; the whole unit
    /// was rolled back and the underlying cause is carried here.
    #[error("transaction aborted: {0}")]
    Aborted(#[from] StoreError),

    /// Rollback itself failed after an aborted step. Both causes are named;
    /// this is fatal to the request.
    #[error("rollback failed after aborted transaction: {cause}; rollback error: {rollback}")]
    RollbackFailed {
        cause: StoreError,
        rollback: StoreError,
    },
}

impl TxError {
    /// True when the aborted step failed because a referenced row does not
    /// exist (surfaced verbatim from the store).
    pub fn is_not_found(&self) -> bool {
        matches!(self, TxError::Aborted(StoreError::NotFound))
    }
}
