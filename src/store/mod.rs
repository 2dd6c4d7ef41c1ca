use async_trait::async_trait;
use thiserror::Error;

use crate::{
    account::{Account, ClientId},
    journal::{EntryId, LedgerEntry, NewLedgerEntry, OperationKey},
};

pub mod in_memory_store;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Account {client_id} is not locked by this transaction")]
    NotLocked { client_id: ClientId },
    #[error("Operation key {key} is already committed")]
    DuplicateOperationKey { key: OperationKey },
    #[error("Account {client_id} already exists")]
    DuplicateAccount { client_id: ClientId },
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Storage capability consumed by the ledger engine.
///
/// Reads on the store itself see committed state only and never block on
/// account locks. Every mutation goes through a [`LedgerTransaction`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Transaction: LedgerTransaction;

    /// Opens a new atomic scope.
    async fn begin(&self) -> Result<Self::Transaction, StoreError>;

    async fn lookup(&self, client_id: &ClientId) -> Result<Option<Account>, StoreError>;

    /// Committed entries recorded under `key`; empty when the key was never used.
    async fn find_by_operation_key(
        &self,
        key: &OperationKey,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Entries of one client in commit order.
    async fn entries_for_client(&self, client_id: &ClientId)
    -> Result<Vec<LedgerEntry>, StoreError>;

    /// Account state and its entries, read as of the same commit.
    async fn snapshot(
        &self,
        client_id: &ClientId,
    ) -> Result<Option<(Account, Vec<LedgerEntry>)>, StoreError>;
}

/// One atomic scope. Dropping it without [`commit`](LedgerTransaction::commit)
/// aborts every staged change and releases every lock it holds.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Exclusive hold on an idempotency key until the scope ends.
    async fn lock_operation_key(&mut self, key: &OperationKey) -> Result<(), StoreError>;

    async fn find_by_operation_key(
        &mut self,
        key: &OperationKey,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Exclusive hold on an account until the scope ends; `None` if it does not exist.
    ///
    /// Locking an account this scope already holds returns its staged state.
    async fn lock_for_update(&mut self, client_id: &ClientId)
    -> Result<Option<Account>, StoreError>;

    /// Stages a new balance for an account held by this scope.
    fn set_balance(&mut self, client_id: &ClientId, balance: i64) -> Result<(), StoreError>;

    /// Stages a journal entry for an account held by this scope.
    fn append(&mut self, entry: NewLedgerEntry) -> Result<EntryId, StoreError>;

    /// Publishes staged balances and entries together.
    async fn commit(self) -> Result<(), StoreError>;
}
