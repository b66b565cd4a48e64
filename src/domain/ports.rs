use super::note::{Exchange, Note};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Client of the external currency authority that owns the notes.
///
/// Every call may suspend and may fail with a transport error, reported as
/// [`CashierError::AuthorityFailure`](crate::error::CashierError::AuthorityFailure).
#[async_trait]
pub trait CurrencyAuthority: Send + Sync {
    /// Melts `note` and the optional `other` into a single note.
    async fn melt(&self, note: &Note, other: Option<&Note>) -> Result<Exchange>;

    /// Breaks `note` into a note worth `split` and a note worth `remainder`.
    async fn break_note(&self, note: &Note, remainder: i64, split: i64) -> Result<Exchange>;

    /// Confirms the exchange identified by `transaction_id`.
    async fn commit(&self, url: &str, transaction_id: &str) -> Result<()>;
}

/// A live connection to the lock provider, able to hold named locks.
#[async_trait]
pub trait LockHandle: Send + Sync {
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<()>;
    fn release(&self, name: &str) -> Result<()>;
    fn is_alive(&self) -> bool;
    /// Releases whatever the handle holds and marks it dead.
    fn close(&self);
}

/// Opens started lock handles.
pub trait LockProvider: Send + Sync {
    fn connect(&self) -> Result<LockHandleRef>;
}

pub type CurrencyAuthorityBox = Box<dyn CurrencyAuthority>;
pub type LockProviderBox = Box<dyn LockProvider>;
pub type LockHandleRef = Arc<dyn LockHandle>;
