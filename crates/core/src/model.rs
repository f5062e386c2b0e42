//! Ledger row types.
//!
//! `Account` is the only mutable row, and only its `balance` ever changes.
//! `Entry` and `Transfer` are immutable once written: they are created as a
//! byproduct of a coordinated transfer and destroyed only by a cascading
//! account deletion, never updated in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::currency::Currency;
use crate::id::{AccountId, EntryId, TransferId};

/// A bank account.
///
/// `balance` is in the smallest currency unit (e.g. cents) and is mutated
/// exclusively through balance-adjustment statements issued inside a
/// transaction scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner: String,
    pub balance: i64,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub owner: String,
    pub balance: i64,
    pub currency: Currency,
}

/// One immutable ledger line against a single account.
///
/// Negative `amount` is a debit, positive a credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub account_id: AccountId,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Parameters for recording a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntry {
    pub account_id: AccountId,
    pub amount: i64,
}

/// An immutable record of a money movement between two accounts.
///
/// `amount` is always positive; the direction is carried by the two account
/// ids. Every committed transfer is paired with exactly two entries whose
/// amounts are `-amount` and `+amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Parameters for recording a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransfer {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}
