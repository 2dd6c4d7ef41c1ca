/// Client accounts: identifiers, balances and the balance floor check.
pub mod account;

/// Currency codes and rendering of minor units.
pub mod currency;

/// Validated payment and transfer commands, executed by [`engine`].
pub mod command;

/// Append-only journal entries, the audit trail of every balance change.
pub mod journal;

/// Storage capability the engine runs on, plus an "in memory" implementation.
///
/// A relational backend would map `lock_for_update` to `SELECT ... FOR UPDATE`
/// and `lock_operation_key` to a transaction-scoped advisory lock.
pub mod store;

/// Transaction coordinator. Owns the locking discipline, idempotent replay and
/// the payment / transfer state machines.
pub mod engine;

/// Engine settings and their environment loading.
pub mod config;

/// Batch front-end over the engine: seeds accounts and replays operations from
/// CSV, then prints the resulting balances. Kept in the library so integration
/// tests can drive it.
pub mod bin_utils;

pub use account::{Account, ClientId};
pub use command::{IdempotencyKey, OperationKind, PaymentCommand, TransferCommand};
pub use config::{IdempotencyPolicy, LedgerConfig};
pub use engine::{ErrorKind, Ledger, LedgerError, PaymentReceipt, RequestContext, TransferReceipt};
pub use store::in_memory_store::InMemoryLedgerStore;
