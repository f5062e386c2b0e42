//! Ledger data-access boundary.
//!
//! This module defines a storage-facing abstraction over the three ledger
//! tables (accounts, entries, transfers) without making any backend
//! assumptions beyond standard ACID transactions.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::MemLedgerStore;
pub use postgres::PgLedgerStore;
pub use r#trait::{LedgerStore, LedgerTx, StoreError};
