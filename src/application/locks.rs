use crate::domain::note::CurrencySerial;
use crate::domain::ports::{LockHandleRef, LockProviderBox};
use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Owns one lock handle per currency and serializes cash movement with it.
///
/// Handles are created on first use, reused while alive, replaced when found
/// dead and only closed by [`LockManager::close`].
pub struct LockManager {
    provider: LockProviderBox,
    handles: Mutex<HashMap<String, LockHandleRef>>,
    acquire_timeout: Duration,
}

impl LockManager {
    pub fn new(provider: LockProviderBox, acquire_timeout: Duration) -> Self {
        Self {
            provider,
            handles: Mutex::new(HashMap::new()),
            acquire_timeout,
        }
    }

    pub fn lock_name(currency_serial: CurrencySerial) -> String {
        format!("cash_{currency_serial}")
    }

    /// Waits for the lock of `currency_serial`, at most the configured
    /// acquire timeout.
    ///
    /// The returned guard releases the lock when dropped.
    pub async fn lock(&self, currency_serial: CurrencySerial) -> Result<CurrencyLock<'_>> {
        let name = Self::lock_name(currency_serial);
        debug!(%name, "get lock");
        let handle = self.live_handle(&name)?;
        handle.acquire(&name, self.acquire_timeout).await?;
        debug!(%name, "lock acquired");
        Ok(CurrencyLock {
            manager: self,
            currency_serial,
            handle,
        })
    }

    fn live_handle(&self, name: &str) -> Result<LockHandleRef> {
        let mut handles = self.handles();
        if let Some(handle) = handles.get(name)
            && handle.is_alive()
        {
            return Ok(Arc::clone(handle));
        }
        if let Some(dead) = handles.remove(name) {
            debug!(name, "replacing dead lock handle");
            dead.close();
        }
        let handle = self.provider.connect()?;
        handles.insert(name.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Releases the lock of `currency_serial`.
    ///
    /// By the time this runs the owning sequence has finished, so a missing
    /// or dead handle is only logged.
    pub fn unlock(&self, currency_serial: CurrencySerial) {
        self.release(currency_serial, None);
    }

    /// Releases the lock through the handle that acquired it. When that
    /// handle was replaced in the meantime, the lock it held is gone and the
    /// successor's lock must not be touched.
    fn release(&self, currency_serial: CurrencySerial, acquired: Option<&LockHandleRef>) {
        let name = Self::lock_name(currency_serial);
        let handles = self.handles();
        match handles.get(&name) {
            None => warn!(%name, "unexpected missing lock (ignored)"),
            Some(handle) if acquired.is_some_and(|acquired| !Arc::ptr_eq(acquired, handle)) => {
                warn!(%name, "lock handle replaced since acquisition (ignored)")
            }
            Some(handle) if !handle.is_alive() => warn!(%name, "unexpected dead lock (ignored)"),
            Some(handle) => match handle.release(&name) {
                Ok(()) => debug!(%name, "lock released"),
                Err(err) => warn!(%name, %err, "lock release failed (ignored)"),
            },
        }
    }

    /// Closes every handle. Called at shutdown.
    pub fn close(&self) {
        for (name, handle) in self.handles().drain() {
            debug!(%name, "closing lock handle");
            handle.close();
        }
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<String, LockHandleRef>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds the lock of one currency until dropped.
#[must_use = "the currency lock is released as soon as the guard is dropped"]
pub struct CurrencyLock<'a> {
    manager: &'a LockManager,
    currency_serial: CurrencySerial,
    handle: LockHandleRef,
}

impl CurrencyLock<'_> {
    pub fn currency_serial(&self) -> CurrencySerial {
        self.currency_serial
    }
}

impl Drop for CurrencyLock<'_> {
    fn drop(&mut self) {
        self.manager
            .release(self.currency_serial, Some(&self.handle));
    }
}
