use crate::error::CashierError;
use std::fmt;
use std::str::FromStr;

/// Locally assigned serial of a currency url.
pub type CurrencySerial = u32;
/// Serial of the user owning a balance.
pub type UserSerial = u32;
/// Serial assigned to a note by the currency authority.
pub type NoteSerial = i64;

/// A value token issued by the currency authority.
///
/// Notes are never split or merged locally; only the authority melts or
/// breaks them, and it must conserve the summed value when it does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub url: String,
    pub serial: NoteSerial,
    pub name: String,
    pub value: i64,
}

impl Note {
    pub fn new(url: impl Into<String>, serial: NoteSerial, name: impl Into<String>, value: i64) -> Self {
        Self {
            url: url.into(),
            serial,
            name: name.into(),
            value,
        }
    }
}

/// Result of a melt or break: the notes the authority issued and the
/// transaction id that must be committed before they become valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub transaction_id: String,
    pub notes: Vec<Note>,
}

/// Role of a note staged on the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoteStatus {
    /// Issued by the authority, not yet confirmed.
    New,
    /// Being retired by the pending exchange.
    Retired,
    /// Remainder of a break, becomes the next safe note.
    Remainder,
    /// User side of a break.
    User,
    /// Confirmed and ready to be handed to the user.
    Committed,
}

impl NoteStatus {
    pub fn code(self) -> &'static str {
        match self {
            Self::New => "n",
            Self::Retired => "y",
            Self::Remainder => "r",
            Self::User => "u",
            Self::Committed => "c",
        }
    }
}

impl fmt::Display for NoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for NoteStatus {
    type Err = CashierError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        match code {
            "n" => Ok(Self::New),
            "y" => Ok(Self::Retired),
            "r" => Ok(Self::Remainder),
            "u" => Ok(Self::User),
            "c" => Ok(Self::Committed),
            other => Err(CashierError::InternalError(format!(
                "unknown counter status '{other}'"
            ))),
        }
    }
}

/// A row of the counter: one note taking part in an in-flight exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterEntry {
    pub transaction_id: String,
    pub user_serial: UserSerial,
    pub currency_serial: CurrencySerial,
    pub serial: NoteSerial,
    pub name: String,
    pub value: i64,
    pub status: NoteStatus,
    pub application_data: String,
}

/// The note currently backing every balance of a currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeEntry {
    pub currency_serial: CurrencySerial,
    pub serial: NoteSerial,
    pub name: String,
    pub value: i64,
}

impl SafeEntry {
    pub fn into_note(self, url: &str) -> Note {
        Note::new(url, self.serial, self.name, self.value)
    }
}

/// A confirmed note ready to be handed to the user who cashed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashOutNote {
    pub user_serial: UserSerial,
    pub url: String,
    pub serial: NoteSerial,
    pub name: String,
    pub value: i64,
    pub application_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserBalance {
    pub user_serial: UserSerial,
    pub currency_serial: CurrencySerial,
    pub url: String,
    pub amount: i64,
}
