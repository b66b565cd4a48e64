#![allow(dead_code)]

use async_trait::async_trait;
use cashier::application::cashier::Cashier;
use cashier::config::CashierConfig;
use cashier::domain::cash::CashIn;
use cashier::domain::note::{Exchange, Note};
use cashier::domain::ports::CurrencyAuthority;
use cashier::error::Result;
use cashier::infrastructure::in_memory::{InMemoryCurrencyAuthority, InMemoryLockProvider};
use cashier::infrastructure::sqlite::SqliteStore;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;

pub const REQUEST_HEADER: &str = "op,user,url,value,serial,name,application_data";

/// Writes a request file with the header followed by `rows`.
pub fn request_file(rows: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{REQUEST_HEADER}").unwrap();
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }
    file.flush().unwrap();
    file
}

#[derive(Default)]
struct InFlight {
    current: HashMap<String, usize>,
    max: HashMap<String, usize>,
}

/// Wraps the sandbox authority and records how many calls overlap per
/// currency url.
pub struct InstrumentedAuthority {
    inner: InMemoryCurrencyAuthority,
    in_flight: Mutex<InFlight>,
    calls: AtomicUsize,
    delay: Duration,
}

impl InstrumentedAuthority {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: InMemoryCurrencyAuthority::new(),
            in_flight: Mutex::new(InFlight::default()),
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn max_in_flight(&self, url: &str) -> usize {
        self.in_flight
            .lock()
            .unwrap()
            .max
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self, url: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut in_flight = self.in_flight.lock().unwrap();
        let current = in_flight.current.entry(url.to_string()).or_default();
        *current += 1;
        let current = *current;
        let max = in_flight.max.entry(url.to_string()).or_default();
        *max = (*max).max(current);
    }

    fn leave(&self, url: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(current) = in_flight.current.get_mut(url) {
            *current -= 1;
        }
    }

    async fn observed<T>(&self, url: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        self.enter(url);
        tokio::time::sleep(self.delay).await;
        let result = call.await;
        self.leave(url);
        result
    }
}

/// Lets the test keep a handle on the authority it gives to the cashier.
pub struct SharedAuthority(pub Arc<InstrumentedAuthority>);

#[async_trait]
impl CurrencyAuthority for SharedAuthority {
    async fn melt(&self, note: &Note, other: Option<&Note>) -> Result<Exchange> {
        let authority = &self.0;
        authority
            .observed(&note.url, authority.inner.melt(note, other))
            .await
    }

    async fn break_note(&self, note: &Note, remainder: i64, split: i64) -> Result<Exchange> {
        let authority = &self.0;
        authority
            .observed(&note.url, authority.inner.break_note(note, remainder, split))
            .await
    }

    async fn commit(&self, url: &str, transaction_id: &str) -> Result<()> {
        let authority = &self.0;
        authority
            .observed(url, authority.inner.commit(url, transaction_id))
            .await
    }
}

pub fn config() -> CashierConfig {
    CashierConfig {
        user_create: true,
        acquire_timeout_secs: 30,
    }
}

pub fn cashier_with(store: SqliteStore, authority: &Arc<InstrumentedAuthority>) -> Cashier {
    Cashier::new(
        &config(),
        store,
        Box::new(SharedAuthority(Arc::clone(authority))),
        Box::new(InMemoryLockProvider::new()),
    )
}

/// A deposit of a client note whose serial cannot clash with minted ones.
pub fn deposit(user_serial: u32, url: &str, index: i64, value: i64) -> CashIn {
    CashIn {
        user_serial,
        note: Note::new(
            url,
            (index + 1) * 1_000_000,
            format!("client-{index}"),
            value,
        ),
        application_data: format!("deposit-{index}"),
    }
}
