use std::{future::Future, time::Duration};

use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::{
    account::{Account, AccountError, ClientId},
    command::CommandError,
    config::LedgerConfig,
    currency::Currency,
    journal::LedgerEntry,
    store::{LedgerStore, LedgerTransaction, StoreError},
};

pub mod idempotency;
pub mod payment;
pub mod transfer;

pub use payment::PaymentReceipt;
pub use transfer::TransferReceipt;

/// How a caller should treat a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced client does not exist.
    NotFound,
    /// The request can never succeed as stated.
    Rejected,
    /// Safe to retry, ideally with the same idempotency key.
    Transient,
    /// Balances and journal disagree; needs investigation.
    Integrity,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Client {client_id} not found")]
    ClientNotFound { client_id: ClientId },
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(
        "Currency mismatch: {from_client} holds {from_currency}, {to_client} holds {to_currency}"
    )]
    CurrencyMismatch {
        from_client: ClientId,
        from_currency: Currency,
        to_client: ClientId,
        to_currency: Currency,
    },
    #[error("Deadline exceeded while waiting for {resource}")]
    Timeout { resource: String },
    #[error("Concurrent operation conflict: {0}")]
    Conflict(String),
    #[error("Storage failure: {0}")]
    Store(StoreError),
    #[error("Ledger integrity violation: {0}")]
    Integrity(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::ClientNotFound { .. } => ErrorKind::NotFound,
            LedgerError::Command(_)
            | LedgerError::Account(_)
            | LedgerError::CurrencyMismatch { .. } => ErrorKind::Rejected,
            LedgerError::Timeout { .. } | LedgerError::Conflict(_) | LedgerError::Store(_) => {
                ErrorKind::Transient
            }
            LedgerError::Integrity(_) => ErrorKind::Integrity,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateOperationKey { key } => {
                LedgerError::Conflict(format!("operation key {key} was committed concurrently"))
            }
            StoreError::NotLocked { client_id } => LedgerError::Integrity(format!(
                "write to account {client_id} without holding its lock"
            )),
            other => LedgerError::Store(other),
        }
    }
}

/// Per-request state threaded through every engine call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    deadline: Instant,
}

impl RequestContext {
    pub fn new(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            deadline,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Awaits a lock acquisition unless the deadline passes first. On expiry the
    /// pending wait is dropped; the caller then drops its transaction.
    pub(crate) async fn bounded<T>(
        &self,
        resource: String,
        wait: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, LedgerError> {
        match tokio::time::timeout_at(self.deadline, wait).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(request_id = %self.request_id, %resource, "deadline exceeded");
                Err(LedgerError::Timeout { resource })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    pub balance: i64,
    pub currency: Currency,
}

/// Result of checking an account against its journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub client_id: ClientId,
    pub opening_balance: i64,
    pub journal_total: i64,
    pub balance: i64,
    pub entry_count: usize,
}

/// Transaction coordinator: the only writer of balances and journal entries.
///
/// The balance column is authoritative; the journal is the audit trail, and
/// both are written in the same transaction. [`Ledger::reconcile`] checks they agree.
#[derive(Debug)]
pub struct Ledger<S> {
    store: S,
    config: LedgerConfig,
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Context bounded by the configured lock timeout.
    pub fn request_context(&self) -> RequestContext {
        RequestContext::new(self.config.lock_timeout)
    }

    #[instrument(skip_all, fields(client_id = %client_id))]
    pub async fn balance(&self, client_id: &ClientId) -> Result<Balance, LedgerError> {
        let account = self
            .store
            .lookup(client_id)
            .await?
            .ok_or_else(|| not_found(client_id))?;
        Ok(Balance {
            balance: account.balance(),
            currency: account.currency().clone(),
        })
    }

    /// Journal entries of a client, oldest first.
    #[instrument(skip_all, fields(client_id = %client_id))]
    pub async fn entries(&self, client_id: &ClientId) -> Result<Vec<LedgerEntry>, LedgerError> {
        let entries = self.store.entries_for_client(client_id).await?;
        if entries.is_empty() && self.store.lookup(client_id).await?.is_none() {
            return Err(not_found(client_id));
        }
        Ok(entries)
    }

    /// Checks `balance == opening_balance + sum(entries)` for one client.
    ///
    /// A mismatch is reported as [`LedgerError::Integrity`] and never repaired.
    #[instrument(skip_all, fields(client_id = %client_id))]
    pub async fn reconcile(&self, client_id: &ClientId) -> Result<Reconciliation, LedgerError> {
        let (account, entries) = self
            .store
            .snapshot(client_id)
            .await?
            .ok_or_else(|| not_found(client_id))?;

        let journal_total = entries
            .iter()
            .try_fold(0i64, |total, entry| total.checked_add(entry.amount))
            .ok_or_else(|| {
                LedgerError::Integrity(format!("journal total of {client_id} overflows"))
            })?;
        let expected = account
            .opening_balance()
            .checked_add(journal_total)
            .ok_or_else(|| {
                LedgerError::Integrity(format!("expected balance of {client_id} overflows"))
            })?;

        if expected != account.balance() {
            error!(
                expected,
                balance = account.balance(),
                "balance diverged from journal"
            );
            return Err(LedgerError::Integrity(format!(
                "balance of {client_id} is {}, journal implies {expected}",
                account.balance()
            )));
        }
        if let Some(last) = entries.last() {
            if last.balance_after != account.balance() {
                error!(
                    entry_id = %last.entry_id,
                    recorded = last.balance_after,
                    balance = account.balance(),
                    "latest entry disagrees with balance"
                );
                return Err(LedgerError::Integrity(format!(
                    "latest entry {} of {client_id} records balance {}, account holds {}",
                    last.entry_id,
                    last.balance_after,
                    account.balance()
                )));
            }
        }

        Ok(Reconciliation {
            client_id: client_id.clone(),
            opening_balance: account.opening_balance(),
            journal_total,
            balance: account.balance(),
            entry_count: entries.len(),
        })
    }

    pub(crate) async fn lock_account(
        &self,
        ctx: &RequestContext,
        tx: &mut S::Transaction,
        client_id: &ClientId,
    ) -> Result<Account, LedgerError> {
        ctx.bounded(format!("account {client_id}"), tx.lock_for_update(client_id))
            .await?
            .ok_or_else(|| not_found(client_id))
    }
}

fn not_found(client_id: &ClientId) -> LedgerError {
    LedgerError::ClientNotFound {
        client_id: client_id.clone(),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::{currency::Currency, store::in_memory_store::InMemoryLedgerStore};

    use super::*;

    pub fn client(id: &str) -> ClientId {
        ClientId::new(id).unwrap()
    }

    /// Clients `A` and `B` with 10000 JPY each, `U` with 10000 USD.
    pub fn test_ledger(config: LedgerConfig) -> Ledger<InMemoryLedgerStore> {
        let jpy = Currency::new("JPY").unwrap();
        let store = InMemoryLedgerStore::with_accounts([
            Account::open(client("A"), jpy.clone(), 10000),
            Account::open(client("B"), jpy, 10000),
            Account::open(client("U"), Currency::new("USD").unwrap(), 10000),
        ])
        .unwrap();
        Ledger::new(store, config)
    }
}
