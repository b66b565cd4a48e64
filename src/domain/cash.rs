//! Decoded cash requests and their outcomes.
//!
//! These are the values request handlers hand to the cashier; the wire format
//! they were decoded from is not the cashier's concern.

use super::note::{CashOutNote, Note, UserSerial};

/// Deposit of a note into the user's balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashIn {
    pub user_serial: UserSerial,
    pub note: Note,
    pub application_data: String,
}

/// Withdrawal of `value` units of the currency at `url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashOut {
    pub user_serial: UserSerial,
    pub url: String,
    pub value: i64,
    pub application_data: String,
}

/// Client acknowledgment that the cashed out note named `reference` was
/// received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashOutCommit {
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashQuery {
    pub application_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CashCommand {
    In(CashIn),
    Out(CashOut),
    OutCommit(CashOutCommit),
    Query(CashQuery),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CashOutcome {
    Ack,
    Note(CashOutNote),
    /// Number of committed counter rows removed by a cash-out commit.
    Acknowledged(usize),
}
