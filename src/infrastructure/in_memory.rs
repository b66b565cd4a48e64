use crate::domain::note::{Exchange, Note, NoteSerial};
use crate::domain::ports::{CurrencyAuthority, LockHandle, LockHandleRef, LockProvider};
use crate::error::{CashierError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Default)]
struct AuthorityState {
    next_serial: NoteSerial,
    next_transaction: u64,
    pending: HashMap<String, Vec<Note>>,
    committed: HashSet<String>,
    spent: HashSet<(String, NoteSerial)>,
}

impl AuthorityState {
    fn check_spendable(&self, note: &Note) -> Result<()> {
        if note.value < 0 {
            return Err(CashierError::AuthorityFailure(format!(
                "note {} has negative value {}",
                note.serial, note.value
            )));
        }
        if self.spent.contains(&(note.url.clone(), note.serial)) {
            return Err(CashierError::AuthorityFailure(format!(
                "note {} of {} was already spent",
                note.serial, note.url
            )));
        }
        Ok(())
    }

    /// Keeps minted serials clear of every serial seen so far.
    fn observe(&mut self, note: &Note) {
        self.next_serial = self.next_serial.max(note.serial + 1);
    }

    fn mint(&mut self, url: &str, transaction_id: &str, value: i64) -> Note {
        self.next_serial = self.next_serial.max(1);
        let serial = self.next_serial;
        self.next_serial += 1;
        Note::new(url, serial, format!("{transaction_id}/{serial}"), value)
    }

    fn open_transaction(&mut self) -> String {
        self.next_transaction += 1;
        format!("tx-{}-{}", std::process::id(), self.next_transaction)
    }
}

/// A sandbox currency authority living in the cashier process.
///
/// It trusts any note it has not seen spent, mints replacement notes that
/// conserve value, and only marks inputs spent once their exchange is
/// committed. Committing twice is acknowledged both times.
#[derive(Default)]
pub struct InMemoryCurrencyAuthority {
    state: Mutex<AuthorityState>,
    refuse_next_call: AtomicBool,
    drop_next_commit_reply: AtomicBool,
}

impl InMemoryCurrencyAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call fail before reaching the authority.
    pub fn refuse_next_call(&self) {
        self.refuse_next_call.store(true, Ordering::SeqCst);
    }

    /// Makes the next commit apply but report a transport failure, as if the
    /// connection dropped before the reply arrived.
    pub fn drop_next_commit_reply(&self) {
        self.drop_next_commit_reply.store(true, Ordering::SeqCst);
    }

    pub async fn is_spent(&self, url: &str, serial: NoteSerial) -> bool {
        self.state
            .lock()
            .await
            .spent
            .contains(&(url.to_string(), serial))
    }

    fn check_reachable(&self) -> Result<()> {
        if self.refuse_next_call.swap(false, Ordering::SeqCst) {
            return Err(CashierError::AuthorityFailure("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CurrencyAuthority for InMemoryCurrencyAuthority {
    async fn melt(&self, note: &Note, other: Option<&Note>) -> Result<Exchange> {
        self.check_reachable()?;
        let mut state = self.state.lock().await;
        let inputs: Vec<Note> = std::iter::once(note).chain(other).cloned().collect();
        for input in &inputs {
            if input.url != note.url {
                return Err(CashierError::AuthorityFailure(format!(
                    "cannot melt {} with {}",
                    note.url, input.url
                )));
            }
            state.check_spendable(input)?;
            state.observe(input);
        }

        let value = inputs
            .iter()
            .try_fold(0i64, |total, input| total.checked_add(input.value))
            .ok_or_else(|| {
                CashierError::AuthorityFailure(format!("melting notes of {} overflows", note.url))
            })?;
        let transaction_id = state.open_transaction();
        let melted = state.mint(&note.url, &transaction_id, value);
        debug!(%transaction_id, value, "melted notes");
        state.pending.insert(transaction_id.clone(), inputs);
        Ok(Exchange {
            transaction_id,
            notes: vec![melted],
        })
    }

    async fn break_note(&self, note: &Note, remainder: i64, split: i64) -> Result<Exchange> {
        self.check_reachable()?;
        let mut state = self.state.lock().await;
        state.check_spendable(note)?;
        if split <= 0 || remainder < 0 || remainder.checked_add(split) != Some(note.value) {
            return Err(CashierError::AuthorityFailure(format!(
                "cannot break {} into {split} and {remainder}",
                note.value
            )));
        }
        state.observe(note);

        let transaction_id = state.open_transaction();
        let user_note = state.mint(&note.url, &transaction_id, split);
        let rest = state.mint(&note.url, &transaction_id, remainder);
        debug!(%transaction_id, split, remainder, "broke note");
        state
            .pending
            .insert(transaction_id.clone(), vec![note.clone()]);
        Ok(Exchange {
            transaction_id,
            notes: vec![user_note, rest],
        })
    }

    async fn commit(&self, url: &str, transaction_id: &str) -> Result<()> {
        self.check_reachable()?;
        let mut state = self.state.lock().await;
        if !state.committed.contains(transaction_id) {
            let consumed = state.pending.get(transaction_id).ok_or_else(|| {
                CashierError::AuthorityFailure(format!(
                    "unknown transaction {transaction_id} for {url}"
                ))
            })?;
            // Another exchange may have spent an input since this one opened.
            for note in consumed {
                state.check_spendable(note)?;
            }
            let consumed = state.pending.remove(transaction_id).unwrap_or_default();
            for note in consumed {
                state.spent.insert((note.url, note.serial));
            }
            state.committed.insert(transaction_id.to_string());
            debug!(transaction_id, "committed");
        }
        if self.drop_next_commit_reply.swap(false, Ordering::SeqCst) {
            return Err(CashierError::AuthorityFailure(
                "connection lost before commit reply".into(),
            ));
        }
        Ok(())
    }
}

type NamedLocks = Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Named locks shared by every handle of one provider, standing in for a
/// lock server.
#[derive(Default)]
pub struct InMemoryLockProvider {
    locks: NamedLocks,
    handles: std::sync::Mutex<Vec<Arc<InMemoryLockHandle>>>,
    connections: AtomicUsize,
}

impl InMemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles opened so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Drops every open connection: handles die and lose the locks they hold.
    pub fn sever(&self) {
        let handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in handles.iter() {
            handle.close();
        }
    }
}

impl LockProvider for InMemoryLockProvider {
    fn connect(&self) -> Result<LockHandleRef> {
        let handle = Arc::new(InMemoryLockHandle {
            locks: Arc::clone(&self.locks),
            held: std::sync::Mutex::new(HashMap::new()),
            alive: AtomicBool::new(true),
        });
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&handle));
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }
}

pub struct InMemoryLockHandle {
    locks: NamedLocks,
    held: std::sync::Mutex<HashMap<String, OwnedMutexGuard<()>>>,
    alive: AtomicBool,
}

impl InMemoryLockHandle {
    fn named(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    fn held(&self) -> std::sync::MutexGuard<'_, HashMap<String, OwnedMutexGuard<()>>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LockHandle for InMemoryLockHandle {
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<()> {
        if !self.is_alive() {
            return Err(CashierError::LockFailure(format!(
                "cannot acquire {name} on a closed handle"
            )));
        }
        let lock = self.named(name);
        let guard = tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| CashierError::LockTimeout {
                name: name.to_string(),
                timeout,
            })?;
        if !self.is_alive() {
            return Err(CashierError::LockFailure(format!(
                "handle closed while waiting for {name}"
            )));
        }
        self.held().insert(name.to_string(), guard);
        Ok(())
    }

    fn release(&self, name: &str) -> Result<()> {
        self.held()
            .remove(name)
            .map(drop)
            .ok_or_else(|| CashierError::LockFailure(format!("{name} is not held")))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.held().clear();
    }
}
