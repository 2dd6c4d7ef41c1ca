use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex as StdMutex, PoisonError, RwLock},
};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

use crate::{
    account::{Account, ClientId},
    journal::{EntryId, LedgerEntry, NewLedgerEntry, OperationKey},
};

use super::{LedgerStore, LedgerTransaction, StoreError};

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

#[derive(Debug)]
struct AccountSlot {
    /// Held for the whole lifetime of a transaction that locked the account.
    update_lock: Arc<Mutex<()>>,
    /// Last committed state.
    state: RwLock<Account>,
}

#[derive(Debug, Default)]
struct Journal {
    entries: Vec<LedgerEntry>,
    by_operation_key: HashMap<OperationKey, Vec<usize>>,
    by_client: HashMap<ClientId, Vec<usize>>,
}

impl Journal {
    fn push(&mut self, entry: LedgerEntry) {
        let idx = self.entries.len();
        if let Some(key) = &entry.operation_key {
            self.by_operation_key
                .entry(key.clone())
                .or_default()
                .push(idx);
        }
        self.by_client
            .entry(entry.client_id.clone())
            .or_default()
            .push(idx);
        self.entries.push(entry);
    }

    fn select(&self, positions: Option<&Vec<usize>>) -> Vec<LedgerEntry> {
        positions
            .map(|positions| {
                positions
                    .iter()
                    .map(|&idx| self.entries[idx].clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct Shared {
    accounts: RwLock<HashMap<ClientId, Arc<AccountSlot>>>,
    // Commit holds the write side while publishing balances, so readers that
    // take the read side first see balances and entries from the same commit.
    journal: RwLock<Journal>,
    operation_locks: StdMutex<HashMap<OperationKey, Arc<Mutex<()>>>>,
}

impl Shared {
    fn slot(&self, client_id: &ClientId) -> Result<Option<Arc<AccountSlot>>, StoreError> {
        let accounts = self.accounts.read().map_err(poisoned)?;
        Ok(accounts.get(client_id).cloned())
    }
}

/// Ledger storage kept in process memory.
///
/// Account locks and idempotency key locks are async mutexes, so a blocked
/// transaction parks its task instead of a thread. Cloning shares the state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    shared: Arc<Shared>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Result<Self, StoreError> {
        let store = Self::new();
        for account in accounts {
            store.open_account(account)?;
        }
        Ok(store)
    }

    /// Provisions a new account.
    pub fn open_account(&self, account: Account) -> Result<(), StoreError> {
        let mut accounts = self.shared.accounts.write().map_err(poisoned)?;
        if accounts.contains_key(account.client_id()) {
            return Err(StoreError::DuplicateAccount {
                client_id: account.client_id().clone(),
            });
        }
        accounts.insert(
            account.client_id().clone(),
            Arc::new(AccountSlot {
                update_lock: Arc::default(),
                state: RwLock::new(account),
            }),
        );
        Ok(())
    }

    /// Identifiers of every provisioned account, sorted.
    pub fn client_ids(&self) -> Result<Vec<ClientId>, StoreError> {
        let accounts = self.shared.accounts.read().map_err(poisoned)?;
        let mut ids: Vec<ClientId> = accounts.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Transaction, StoreError> {
        Ok(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            operation_locks: Vec::new(),
            accounts: BTreeMap::new(),
            entries: Vec::new(),
        })
    }

    async fn lookup(&self, client_id: &ClientId) -> Result<Option<Account>, StoreError> {
        let Some(slot) = self.shared.slot(client_id)? else {
            return Ok(None);
        };
        let account = slot.state.read().map_err(poisoned)?.clone();
        Ok(Some(account))
    }

    async fn find_by_operation_key(
        &self,
        key: &OperationKey,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let journal = self.shared.journal.read().map_err(poisoned)?;
        Ok(journal.select(journal.by_operation_key.get(key)))
    }

    async fn entries_for_client(
        &self,
        client_id: &ClientId,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let journal = self.shared.journal.read().map_err(poisoned)?;
        Ok(journal.select(journal.by_client.get(client_id)))
    }

    async fn snapshot(
        &self,
        client_id: &ClientId,
    ) -> Result<Option<(Account, Vec<LedgerEntry>)>, StoreError> {
        let journal = self.shared.journal.read().map_err(poisoned)?;
        let Some(slot) = self.shared.slot(client_id)? else {
            return Ok(None);
        };
        let account = slot.state.read().map_err(poisoned)?.clone();
        let entries = journal.select(journal.by_client.get(client_id));
        Ok(Some((account, entries)))
    }
}

struct LockedAccount {
    slot: Arc<AccountSlot>,
    account: Account,
    _guard: OwnedMutexGuard<()>,
}

struct OperationLock {
    shared: Arc<Shared>,
    key: OperationKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for OperationLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map itself references an idle key mutex.
        if let Ok(mut locks) = self.shared.operation_locks.lock() {
            if locks
                .get(&self.key)
                .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
            {
                locks.remove(&self.key);
            }
        }
    }
}

/// Transaction over [`InMemoryLedgerStore`]. Changes stay private to the
/// transaction until [`commit`](LedgerTransaction::commit).
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    operation_locks: Vec<OperationLock>,
    accounts: BTreeMap<ClientId, LockedAccount>,
    entries: Vec<LedgerEntry>,
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn lock_operation_key(&mut self, key: &OperationKey) -> Result<(), StoreError> {
        if self.operation_locks.iter().any(|lock| &lock.key == key) {
            return Ok(());
        }
        let mutex = {
            let mut locks = self.shared.operation_locks.lock().map_err(poisoned)?;
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let guard = mutex.lock_owned().await;
        trace!(%key, "operation key locked");
        self.operation_locks.push(OperationLock {
            shared: Arc::clone(&self.shared),
            key: key.clone(),
            guard: Some(guard),
        });
        Ok(())
    }

    async fn find_by_operation_key(
        &mut self,
        key: &OperationKey,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut found = {
            let journal = self.shared.journal.read().map_err(poisoned)?;
            journal.select(journal.by_operation_key.get(key))
        };
        found.extend(
            self.entries
                .iter()
                .filter(|entry| entry.operation_key.as_ref() == Some(key))
                .cloned(),
        );
        Ok(found)
    }

    async fn lock_for_update(
        &mut self,
        client_id: &ClientId,
    ) -> Result<Option<Account>, StoreError> {
        if let Some(locked) = self.accounts.get(client_id) {
            return Ok(Some(locked.account.clone()));
        }
        let Some(slot) = self.shared.slot(client_id)? else {
            return Ok(None);
        };
        let guard = Arc::clone(&slot.update_lock).lock_owned().await;
        // Read only after the lock is held, so the balance is the latest committed one.
        let account = slot.state.read().map_err(poisoned)?.clone();
        trace!(%client_id, balance = account.balance(), "account locked");
        self.accounts.insert(
            client_id.clone(),
            LockedAccount {
                slot,
                account: account.clone(),
                _guard: guard,
            },
        );
        Ok(Some(account))
    }

    fn set_balance(&mut self, client_id: &ClientId, balance: i64) -> Result<(), StoreError> {
        let locked = self
            .accounts
            .get_mut(client_id)
            .ok_or_else(|| StoreError::NotLocked {
                client_id: client_id.clone(),
            })?;
        locked.account.set_balance(balance);
        Ok(())
    }

    fn append(&mut self, entry: NewLedgerEntry) -> Result<EntryId, StoreError> {
        if !self.accounts.contains_key(&entry.client_id) {
            return Err(StoreError::NotLocked {
                client_id: entry.client_id,
            });
        }
        let entry = entry.into_entry();
        let entry_id = entry.entry_id;
        self.entries.push(entry);
        Ok(entry_id)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let entries = std::mem::take(&mut self.entries);
        let mut journal = self.shared.journal.write().map_err(poisoned)?;

        for entry in &entries {
            if let Some(key) = &entry.operation_key {
                if journal.by_operation_key.contains_key(key) {
                    return Err(StoreError::DuplicateOperationKey { key: key.clone() });
                }
            }
        }

        // Acquire every write guard before touching anything, so a failure
        // cannot leave half of the balances published.
        let mut states = Vec::with_capacity(self.accounts.len());
        for locked in self.accounts.values() {
            let state = locked.slot.state.write().map_err(poisoned)?;
            states.push((state, locked.account.balance()));
        }
        for (mut state, balance) in states {
            state.set_balance(balance);
        }

        let entry_count = entries.len();
        for entry in entries {
            journal.push(entry);
        }
        drop(journal);

        debug!(
            accounts = self.accounts.len(),
            entries = entry_count,
            "transaction committed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use crate::{
        command::{IdempotencyKey, OperationKind},
        currency::Currency,
    };

    use super::*;

    fn client(id: &str) -> ClientId {
        ClientId::new(id).unwrap()
    }

    fn store() -> InMemoryLedgerStore {
        let jpy = Currency::new("JPY").unwrap();
        InMemoryLedgerStore::with_accounts([
            Account::open(client("A"), jpy.clone(), 10000),
            Account::open(client("B"), jpy, 10000),
        ])
        .unwrap()
    }

    fn op_key(key: &str) -> OperationKey {
        OperationKey::new(OperationKind::Payment, IdempotencyKey::new(key).unwrap())
    }

    fn new_entry(client_id: &str, amount: i64, balance_after: i64, key: Option<&str>) -> NewLedgerEntry {
        NewLedgerEntry {
            client_id: client(client_id),
            amount,
            balance_after,
            operation_key: key.map(op_key),
        }
    }

    #[tokio::test]
    async fn commit_publishes_balance_and_entries() {
        let store = store();
        let a = client("A");

        let mut tx = store.begin().await.unwrap();
        let acc = tx.lock_for_update(&a).await.unwrap().unwrap();
        assert_eq!(acc.balance(), 10000);
        tx.set_balance(&a, 11400).unwrap();
        let entry_id = tx.append(new_entry("A", 1400, 11400, Some("k1"))).unwrap();

        // nothing visible before commit
        assert_eq!(store.lookup(&a).await.unwrap().unwrap().balance(), 10000);
        assert!(store.entries_for_client(&a).await.unwrap().is_empty());

        tx.commit().await.unwrap();

        assert_eq!(store.lookup(&a).await.unwrap().unwrap().balance(), 11400);
        let entries = store.entries_for_client(&a).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_id, entry_id);
        assert_eq!(entries[0].amount, 1400);

        let by_key = store.find_by_operation_key(&op_key("k1")).await.unwrap();
        assert_eq!(by_key, entries);

        let (account, snapshot_entries) = store.snapshot(&a).await.unwrap().unwrap();
        assert_eq!(account.balance(), 11400);
        assert_eq!(account.opening_balance(), 10000);
        assert_eq!(snapshot_entries, entries);
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = store();
        let a = client("A");

        let mut tx = store.begin().await.unwrap();
        tx.lock_for_update(&a).await.unwrap();
        tx.set_balance(&a, 0).unwrap();
        tx.append(new_entry("A", -10000, 0, Some("k1"))).unwrap();
        drop(tx);

        assert_eq!(store.lookup(&a).await.unwrap().unwrap().balance(), 10000);
        assert!(store.entries_for_client(&a).await.unwrap().is_empty());
        assert!(store.find_by_operation_key(&op_key("k1")).await.unwrap().is_empty());

        // lock was released on drop
        let mut tx = store.begin().await.unwrap();
        let acc = timeout(Duration::from_secs(1), tx.lock_for_update(&a))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(acc.balance(), 10000);
    }

    #[tokio::test]
    async fn lock_waits_for_holder_and_sees_fresh_balance() {
        let store = store();
        let a = client("A");

        let mut tx1 = store.begin().await.unwrap();
        tx1.lock_for_update(&a).await.unwrap();
        tx1.set_balance(&a, 50).unwrap();

        let mut tx2 = store.begin().await.unwrap();
        assert!(
            timeout(Duration::from_millis(20), tx2.lock_for_update(&a))
                .await
                .is_err()
        );

        tx1.commit().await.unwrap();
        let acc = tx2.lock_for_update(&a).await.unwrap().unwrap();
        assert_eq!(acc.balance(), 50);
    }

    #[tokio::test]
    async fn relocking_returns_staged_state() {
        let store = store();
        let a = client("A");

        let mut tx = store.begin().await.unwrap();
        tx.lock_for_update(&a).await.unwrap();
        tx.set_balance(&a, 42).unwrap();
        let acc = tx.lock_for_update(&a).await.unwrap().unwrap();
        assert_eq!(acc.balance(), 42);
    }

    #[tokio::test]
    async fn writes_require_lock() {
        let store = store();
        let a = client("A");

        let mut tx = store.begin().await.unwrap();
        let err = tx.set_balance(&a, 1).unwrap_err();
        assert!(matches!(err, StoreError::NotLocked { .. }));
        let err = tx.append(new_entry("A", 1, 1, None)).unwrap_err();
        assert!(matches!(err, StoreError::NotLocked { .. }));
    }

    #[tokio::test]
    async fn unknown_account() {
        let store = store();
        let x = client("X");
        assert!(store.lookup(&x).await.unwrap().is_none());
        assert!(store.snapshot(&x).await.unwrap().is_none());
        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_for_update(&x).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_rejects_committed_operation_key() {
        let store = store();
        let (a, b) = (client("A"), client("B"));

        let mut tx = store.begin().await.unwrap();
        tx.lock_for_update(&a).await.unwrap();
        tx.append(new_entry("A", 1, 10001, Some("k1"))).unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_for_update(&b).await.unwrap();
        tx.set_balance(&b, 10001).unwrap();
        tx.append(new_entry("B", 1, 10001, Some("k1"))).unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateOperationKey { .. }));

        assert_eq!(store.lookup(&b).await.unwrap().unwrap().balance(), 10000);
        assert!(store.entries_for_client(&b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn operation_lock_serializes_and_is_cleaned_up() {
        let store = store();
        let key = op_key("k1");

        let mut tx1 = store.begin().await.unwrap();
        tx1.lock_operation_key(&key).await.unwrap();
        // reentrant within one transaction
        tx1.lock_operation_key(&key).await.unwrap();

        let mut tx2 = store.begin().await.unwrap();
        assert!(
            timeout(Duration::from_millis(20), tx2.lock_operation_key(&key))
                .await
                .is_err()
        );

        drop(tx1);
        timeout(Duration::from_secs(1), tx2.lock_operation_key(&key))
            .await
            .unwrap()
            .unwrap();
        drop(tx2);

        assert!(store.shared.operation_locks.lock().unwrap().is_empty());
    }

    #[test]
    fn duplicate_account() {
        let store = store();
        let err = store
            .open_account(Account::open(
                client("A"),
                Currency::new("JPY").unwrap(),
                0,
            ))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateAccount { .. }));
        assert_eq!(store.client_ids().unwrap(), vec![client("A"), client("B")]);
    }
}
