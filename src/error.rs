use crate::domain::note::CurrencySerial;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CashierError {
    #[error("invalid currency {url}: unknown and user_create is disabled")]
    CurrencyRejected { url: String },
    #[error("currency {url} was registered concurrently")]
    DuplicateRegistration { url: String },
    #[error("safe integrity violated: {0}")]
    SafeIntegrity(String),
    #[error("break {transaction_id} resulted in {count} notes instead of 2")]
    BreakNoteCount { transaction_id: String, count: usize },
    #[error("break {transaction_id} did not provide a note with value {value}")]
    BreakNoteMismatch { transaction_id: String, value: i64 },
    #[error("no currency note to be collected for currency {currency_serial}")]
    EmptyNote { currency_serial: CurrencySerial },
    #[error("no record with application_data = '{application_data}'")]
    NotFound { application_data: String },
    #[error("lock {name} not acquired within {timeout:?}")]
    LockTimeout { name: String, timeout: Duration },
    #[error("lock provider error: {0}")]
    LockFailure(String),
    #[error("currency authority failure: {0}")]
    AuthorityFailure(String),
    #[error("insufficient funds: safe holds {available}, requested {requested}")]
    InsufficientFunds { available: i64, requested: i64 },
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl CashierError {
    /// `false` for legitimate negative outcomes that callers report as a
    /// normal answer rather than a fault.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::EmptyNote { .. } | Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, CashierError>;
