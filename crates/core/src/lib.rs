//! `coffer-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no storage concerns).

pub mod currency;
pub mod error;
pub mod id;
pub mod model;

pub use currency::Currency;
pub use error::DomainError;
pub use id::{AccountId, EntryId, TransferId};
pub use model::{Account, Entry, NewAccount, NewEntry, NewTransfer, Transfer};
