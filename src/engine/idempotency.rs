use tracing::debug;

use crate::{
    journal::{LedgerEntry, OperationKey},
    store::{LedgerStore, LedgerTransaction},
};

use super::{Ledger, LedgerError, RequestContext};

/// Outcome of the duplicate check that precedes a keyed mutation.
#[derive(Debug)]
pub enum Resolution<T> {
    /// Nothing committed under the key, and the transaction now holds the key lock.
    Proceed,
    /// The key already committed; carries the outcome recorded back then.
    Replay(T),
}

/// Operation outcome that can be rebuilt from the entries recorded under its key.
pub trait RecordedOutcome: Sized {
    fn from_entries(key: &OperationKey, entries: &[LedgerEntry]) -> Result<Self, LedgerError>;
}

impl<S: LedgerStore> Ledger<S> {
    /// Committed outcome for `key`, without taking any lock.
    pub async fn recorded_outcome<T: RecordedOutcome>(
        &self,
        key: &OperationKey,
    ) -> Result<Option<T>, LedgerError> {
        let entries = self.store.find_by_operation_key(key).await?;
        if entries.is_empty() {
            return Ok(None);
        }
        T::from_entries(key, &entries).map(Some)
    }

    /// Decides whether a keyed request runs or replays.
    ///
    /// Committed keys are answered from the journal directly. Otherwise the
    /// key lock is taken and the journal checked again, since the attempt we
    /// waited behind may have committed in the meantime.
    pub(crate) async fn resolve<T: RecordedOutcome>(
        &self,
        ctx: &RequestContext,
        tx: &mut S::Transaction,
        key: &OperationKey,
    ) -> Result<Resolution<T>, LedgerError> {
        if let Some(outcome) = self.recorded_outcome(key).await? {
            debug!(%key, "operation key already committed");
            return Ok(Resolution::Replay(outcome));
        }

        ctx.bounded(format!("operation key {key}"), tx.lock_operation_key(key))
            .await?;

        let entries = tx.find_by_operation_key(key).await?;
        if entries.is_empty() {
            Ok(Resolution::Proceed)
        } else {
            debug!(%key, "operation key committed while waiting");
            T::from_entries(key, &entries).map(Resolution::Replay)
        }
    }
}
