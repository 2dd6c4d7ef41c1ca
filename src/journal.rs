use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    account::ClientId,
    command::{IdempotencyKey, OperationKind},
};

pub type EntryId = Uuid;

/// Idempotency key qualified by the operation kind it was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationKey {
    pub kind: OperationKind,
    pub key: IdempotencyKey,
}

impl OperationKey {
    pub fn new(kind: OperationKind, key: IdempotencyKey) -> Self {
        Self { kind, key }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.kind, self.key)
    }
}

/// Immutable record of one signed balance change.
///
/// `balance_after` is the account balance right after the entry's operation
/// committed, so a replayed request gets the original outcome even if the
/// account moved on since.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub client_id: ClientId,
    pub amount: i64,
    pub balance_after: i64,
    pub operation_key: Option<OperationKey>,
    pub created_at: DateTime<Utc>,
}

/// Entry staged by a transaction; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub client_id: ClientId,
    pub amount: i64,
    pub balance_after: i64,
    pub operation_key: Option<OperationKey>,
}

impl NewLedgerEntry {
    pub(crate) fn into_entry(self) -> LedgerEntry {
        LedgerEntry {
            entry_id: Uuid::now_v7(),
            client_id: self.client_id,
            amount: self.amount,
            balance_after: self.balance_after,
            operation_key: self.operation_key,
            created_at: Utc::now(),
        }
    }
}
