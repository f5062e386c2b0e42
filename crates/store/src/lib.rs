//! `coffer-store` — data-access layer for the ledger.
//!
//! Defines the per-entity data-access contract (`LedgerStore` / `LedgerTx`),
//! a Postgres implementation over `sqlx`, and an in-memory implementation for
//! tests/dev. All multi-row consistency lives one layer up, in `coffer-txn`;
//! this crate only guarantees that each operation is atomic within whatever
//! transaction scope it is invoked in.

pub mod ledger;

pub use ledger::in_memory::MemLedgerStore;
pub use ledger::postgres::PgLedgerStore;
pub use ledger::{LedgerStore, LedgerTx, StoreError};
