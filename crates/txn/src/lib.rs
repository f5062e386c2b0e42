//! `coffer-txn` — the transaction coordinator.
//!
//! Everything multi-row lives here: the transaction scope primitive and the
//! two coordinated operations (`transfer_money`, `delete_account_cascade`)
//! built on top of the `coffer-store` data-access contract. Single-row CRUD
//! and request validation belong to the layers around this crate.

pub mod coordinator;
pub mod error;

pub use coordinator::{TransferOutcome, TransferParams, TxCoordinator};
pub use error::TxError;
