use super::{SqliteStore, is_unique_violation};
use crate::domain::note::CurrencySerial;
use crate::error::{CashierError, Result};
use rusqlite::OptionalExtension;
use tracing::{debug, info};

/// Maps currency urls to local serials.
///
/// Runs under the store's own atomicity only; it never takes a currency lock.
#[derive(Clone)]
pub struct CurrencyRegistry {
    store: SqliteStore,
    user_create: bool,
}

impl CurrencyRegistry {
    pub fn new(store: SqliteStore, user_create: bool) -> Self {
        Self { store, user_create }
    }

    /// Returns the serial of `url`, registering it first when `user_create`
    /// allows it.
    ///
    /// Losing a registration race to another writer is retried exactly once.
    pub fn get_currency_serial(&self, url: &str) -> Result<CurrencySerial> {
        match self.lookup_or_register(url) {
            Err(CashierError::DuplicateRegistration { .. }) => {
                debug!(url, "currency registered concurrently, retrying lookup");
                self.lookup_or_register(url)
            }
            result => result,
        }
    }

    pub fn lookup(&self, url: &str) -> Result<Option<CurrencySerial>> {
        let conn = self.store.connection();
        let serial = conn
            .query_row(
                "SELECT serial FROM currencies WHERE url = ?1",
                [url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(serial)
    }

    fn lookup_or_register(&self, url: &str) -> Result<CurrencySerial> {
        if let Some(serial) = self.lookup(url)? {
            return Ok(serial);
        }
        if !self.user_create {
            return Err(CashierError::CurrencyRejected {
                url: url.to_string(),
            });
        }
        self.register(url)
    }

    pub(crate) fn register(&self, url: &str) -> Result<CurrencySerial> {
        let conn = self.store.connection();
        match conn.execute("INSERT INTO currencies (url) VALUES (?1)", [url]) {
            Ok(1) => {
                let serial = CurrencySerial::try_from(conn.last_insert_rowid()).map_err(|e| {
                    CashierError::InternalError(format!("currency serial out of range: {e}"))
                })?;
                info!(url, serial, "registered currency");
                Ok(serial)
            }
            Ok(affected) => Err(CashierError::InternalError(format!(
                "registering {url} affected {affected} records without raising an error"
            ))),
            Err(e) if is_unique_violation(&e) => Err(CashierError::DuplicateRegistration {
                url: url.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_use_registers_serial_one() {
        let registry = CurrencyRegistry::new(SqliteStore::in_memory().unwrap(), true);
        assert_eq!(registry.get_currency_serial("http://a").unwrap(), 1);
        assert_eq!(registry.get_currency_serial("http://a").unwrap(), 1);
        assert_eq!(registry.get_currency_serial("http://b").unwrap(), 2);
    }

    #[test]
    fn test_unknown_currency_rejected_without_user_create() {
        let registry = CurrencyRegistry::new(SqliteStore::in_memory().unwrap(), false);
        assert!(matches!(
            registry.get_currency_serial("http://a"),
            Err(CashierError::CurrencyRejected { url }) if url == "http://a"
        ));
        assert_eq!(registry.lookup("http://a").unwrap(), None);
    }

    #[test]
    fn test_known_currency_accepted_without_user_create() {
        let store = SqliteStore::in_memory().unwrap();
        CurrencyRegistry::new(store.clone(), true)
            .get_currency_serial("http://a")
            .unwrap();

        let registry = CurrencyRegistry::new(store, false);
        assert_eq!(registry.get_currency_serial("http://a").unwrap(), 1);
    }

    #[test]
    fn test_duplicate_insert_is_reported_as_race() {
        let registry = CurrencyRegistry::new(SqliteStore::in_memory().unwrap(), true);
        registry.register("http://a").unwrap();
        assert!(matches!(
            registry.register("http://a"),
            Err(CashierError::DuplicateRegistration { .. })
        ));
        // The retry path resolves to the winner's serial.
        assert_eq!(registry.get_currency_serial("http://a").unwrap(), 1);
    }
}
