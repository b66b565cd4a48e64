use super::{Rows, SqliteStore, execute_expecting};
use crate::domain::note::{
    CashOutNote, CounterEntry, CurrencySerial, Exchange, Note, NoteSerial, NoteStatus, SafeEntry,
    UserBalance, UserSerial,
};
use crate::error::{CashierError, Result};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use tracing::debug;

/// Who a staged note belongs to and which currency it moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterOwner {
    pub user_serial: UserSerial,
    pub currency_serial: CurrencySerial,
    pub application_data: String,
}

/// The counter, the safe and the user balances.
///
/// Each mutating method runs in a single store transaction: either every
/// statement applies or none does.
#[derive(Clone)]
pub struct StagingLedger {
    store: SqliteStore,
}

impl StagingLedger {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Stages the notes of a melt: `new_notes` are issued but not yet
    /// confirmed, `old_notes` are about to be retired.
    pub fn record_exchange(
        &self,
        owner: &CounterOwner,
        transaction_id: &str,
        new_notes: &[Note],
        old_notes: &[Note],
    ) -> Result<()> {
        debug!(transaction_id, ?new_notes, ?old_notes, "recording exchange");
        let mut conn = self.store.connection();
        let tx = begin(&mut conn)?;
        for note in new_notes {
            insert_counter(&tx, owner, transaction_id, note, NoteStatus::New)?;
        }
        for note in old_notes {
            insert_counter(&tx, owner, transaction_id, note, NoteStatus::Retired)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Moves the confirmed result of a melt into the safe and credits `value`
    /// to the user.
    pub fn promote_to_safe(
        &self,
        transaction_id: &str,
        user_serial: UserSerial,
        currency_serial: CurrencySerial,
        value: i64,
    ) -> Result<()> {
        debug!(transaction_id, user_serial, currency_serial, value, "promoting to safe");
        let mut conn = self.store.connection();
        let tx = begin(&mut conn)?;
        execute_expecting(
            &tx,
            "copy new notes to safe",
            "INSERT INTO safe (currency_serial, serial, name, value)
             SELECT currency_serial, serial, name, value FROM counter
             WHERE transaction_id = ?1 AND status = ?2",
            params![transaction_id, NoteStatus::New],
            Rows::AtLeast(1),
        )?;
        execute_expecting(
            &tx,
            "delete retired safe note",
            "DELETE FROM safe WHERE EXISTS (
                 SELECT 1 FROM counter
                 WHERE counter.transaction_id = ?1
                   AND counter.status = ?2
                   AND counter.currency_serial = safe.currency_serial
                   AND counter.serial = safe.serial
                   AND counter.value = safe.value)",
            params![transaction_id, NoteStatus::Retired],
            Rows::AtLeast(0),
        )?;
        execute_expecting(
            &tx,
            "clear counter",
            "DELETE FROM counter WHERE transaction_id = ?1",
            params![transaction_id],
            Rows::AtLeast(1),
        )?;
        execute_expecting(
            &tx,
            "credit user",
            "INSERT INTO user2money (user_serial, currency_serial, amount) VALUES (?1, ?2, ?3)
             ON CONFLICT (user_serial, currency_serial) DO UPDATE SET amount = amount + excluded.amount",
            params![user_serial, currency_serial, value],
            Rows::AtLeast(0),
        )?;
        ensure_single_safe(&tx, currency_serial)?;
        tx.commit()?;
        Ok(())
    }

    /// Reads the confirmed note waiting on the counter, optionally narrowed
    /// to one transaction.
    pub fn collect_committed(
        &self,
        currency_serial: CurrencySerial,
        transaction_id: Option<&str>,
    ) -> Result<Option<CashOutNote>> {
        let conn = self.store.connection();
        select_committed(&conn, currency_serial, transaction_id)
    }

    /// Applies a confirmed break: the remainder replaces the safe note, the
    /// user note becomes collectible and the user is debited its value.
    ///
    /// Returns [`CashierError::EmptyNote`] without touching anything when no
    /// user note is staged for `transaction_id`.
    pub fn finalize_cash_out(
        &self,
        currency_serial: CurrencySerial,
        transaction_id: &str,
    ) -> Result<CashOutNote> {
        debug!(currency_serial, transaction_id, "finalizing cash out");
        let mut conn = self.store.connection();
        let tx = begin(&mut conn)?;

        let staged: i64 = tx.query_row(
            "SELECT COUNT(*) FROM counter
             WHERE currency_serial = ?1 AND transaction_id = ?2 AND status = ?3",
            params![currency_serial, transaction_id, NoteStatus::User],
            |row| row.get(0),
        )?;
        if staged == 0 {
            return Err(CashierError::EmptyNote { currency_serial });
        }

        execute_expecting(
            &tx,
            "delete safe note",
            "DELETE FROM safe WHERE currency_serial = ?1",
            params![currency_serial],
            Rows::Exactly(1),
        )?;
        execute_expecting(
            &tx,
            "install remainder in safe",
            "INSERT INTO safe (currency_serial, serial, name, value)
             SELECT currency_serial, serial, name, value FROM counter
             WHERE currency_serial = ?1 AND transaction_id = ?2 AND status = ?3",
            params![currency_serial, transaction_id, NoteStatus::Remainder],
            Rows::AtMost(1),
        )?;
        execute_expecting(
            &tx,
            "delete remainder",
            "DELETE FROM counter WHERE currency_serial = ?1 AND transaction_id = ?2 AND status = ?3",
            params![currency_serial, transaction_id, NoteStatus::Remainder],
            Rows::AtMost(1),
        )?;
        execute_expecting(
            &tx,
            "commit user note",
            "UPDATE counter SET status = ?3
             WHERE currency_serial = ?1 AND transaction_id = ?2 AND status = ?4",
            params![
                currency_serial,
                transaction_id,
                NoteStatus::Committed,
                NoteStatus::User
            ],
            Rows::Exactly(1),
        )?;

        let note = select_committed(&tx, currency_serial, Some(transaction_id))?
            .ok_or(CashierError::EmptyNote { currency_serial })?;

        execute_expecting(
            &tx,
            "debit user",
            "UPDATE user2money SET amount = amount - ?1
             WHERE user_serial = ?2 AND currency_serial = ?3",
            params![note.value, note.user_serial, currency_serial],
            Rows::Exactly(1),
        )?;
        ensure_single_safe(&tx, currency_serial)?;
        tx.commit()?;
        Ok(note)
    }

    /// Stages the two notes returned by a break and returns the transaction
    /// id to commit.
    ///
    /// The note worth exactly `requested` goes to the user, the other one is
    /// the remainder. A zero value remainder is not staged.
    pub fn record_break_result(
        &self,
        owner: &CounterOwner,
        requested: i64,
        exchange: &Exchange,
    ) -> Result<String> {
        debug!(?exchange, requested, "recording break result");
        let transaction_id = exchange.transaction_id.as_str();
        let [first, second] = exchange.notes.as_slice() else {
            return Err(CashierError::BreakNoteCount {
                transaction_id: transaction_id.to_string(),
                count: exchange.notes.len(),
            });
        };
        let (user_note, remainder) = if first.value == requested {
            (first, second)
        } else if second.value == requested {
            (second, first)
        } else {
            return Err(CashierError::BreakNoteMismatch {
                transaction_id: transaction_id.to_string(),
                value: requested,
            });
        };

        let mut conn = self.store.connection();
        let tx = begin(&mut conn)?;
        if remainder.value > 0 {
            insert_counter(&tx, owner, transaction_id, remainder, NoteStatus::Remainder)?;
        }
        insert_counter(&tx, owner, transaction_id, user_note, NoteStatus::User)?;
        tx.commit()?;
        Ok(transaction_id.to_string())
    }

    /// Transaction of a melt left on the counter for `note_serial`.
    pub fn unresolved_cash_in(
        &self,
        currency_serial: CurrencySerial,
        note_serial: NoteSerial,
    ) -> Result<Option<String>> {
        let conn = self.store.connection();
        let transaction_id = conn
            .query_row(
                "SELECT transaction_id FROM counter
                 WHERE currency_serial = ?1 AND serial = ?2 AND status IN (?3, ?4)
                 LIMIT 1",
                params![
                    currency_serial,
                    note_serial,
                    NoteStatus::New,
                    NoteStatus::Retired
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(transaction_id)
    }

    /// Transaction of a break left on the counter for the currency, either
    /// unconfirmed or confirmed but not yet acknowledged by the client.
    ///
    /// Unconfirmed breaks come first.
    pub fn unresolved_cash_out(&self, currency_serial: CurrencySerial) -> Result<Option<String>> {
        let conn = self.store.connection();
        let transaction_id = conn
            .query_row(
                "SELECT transaction_id FROM counter
                 WHERE currency_serial = ?1 AND status IN (?2, ?3, ?4)
                 ORDER BY status = ?4, rowid
                 LIMIT 1",
                params![
                    currency_serial,
                    NoteStatus::Remainder,
                    NoteStatus::User,
                    NoteStatus::Committed
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(transaction_id)
    }

    pub fn safe_notes(&self, currency_serial: CurrencySerial) -> Result<Vec<SafeEntry>> {
        let conn = self.store.connection();
        let mut stmt = conn.prepare(
            "SELECT currency_serial, serial, name, value FROM safe WHERE currency_serial = ?1",
        )?;
        let entries = stmt
            .query_map([currency_serial], |row| {
                Ok(SafeEntry {
                    currency_serial: row.get(0)?,
                    serial: row.get(1)?,
                    name: row.get(2)?,
                    value: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn counter_entries(&self, currency_serial: CurrencySerial) -> Result<Vec<CounterEntry>> {
        let conn = self.store.connection();
        let mut stmt = conn.prepare(
            "SELECT transaction_id, user_serial, currency_serial, serial, name, value, status, application_data
             FROM counter WHERE currency_serial = ?1 ORDER BY rowid",
        )?;
        let entries = stmt
            .query_map([currency_serial], |row| {
                Ok(CounterEntry {
                    transaction_id: row.get(0)?,
                    user_serial: row.get(1)?,
                    currency_serial: row.get(2)?,
                    serial: row.get(3)?,
                    name: row.get(4)?,
                    value: row.get(5)?,
                    status: row.get(6)?,
                    application_data: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn balance(
        &self,
        user_serial: UserSerial,
        currency_serial: CurrencySerial,
    ) -> Result<Option<i64>> {
        let conn = self.store.connection();
        let amount = conn
            .query_row(
                "SELECT amount FROM user2money WHERE user_serial = ?1 AND currency_serial = ?2",
                params![user_serial, currency_serial],
                |row| row.get(0),
            )
            .optional()?;
        Ok(amount)
    }

    pub fn balances(&self) -> Result<Vec<UserBalance>> {
        let conn = self.store.connection();
        let mut stmt = conn.prepare(
            "SELECT user2money.user_serial, user2money.currency_serial, currencies.url, user2money.amount
             FROM user2money JOIN currencies ON currencies.serial = user2money.currency_serial
             ORDER BY user2money.user_serial, user2money.currency_serial",
        )?;
        let balances = stmt
            .query_map([], |row| {
                Ok(UserBalance {
                    user_serial: row.get(0)?,
                    currency_serial: row.get(1)?,
                    url: row.get(2)?,
                    amount: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(balances)
    }

    /// Forgets the collected note named `reference`. Returns how many rows
    /// were pending; zero is not an error.
    pub fn delete_committed(&self, reference: &str) -> Result<usize> {
        let conn = self.store.connection();
        let deleted = conn.execute(
            "DELETE FROM counter WHERE name = ?1 AND status = ?2",
            params![reference, NoteStatus::Committed],
        )?;
        Ok(deleted)
    }

    pub fn count_tagged(&self, application_data: &str) -> Result<usize> {
        let conn = self.store.connection();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM counter WHERE application_data = ?1",
            [application_data],
            |row| row.get(0),
        )?;
        usize::try_from(count)
            .map_err(|e| CashierError::InternalError(format!("negative row count: {e}")))
    }
}

fn begin(conn: &mut Connection) -> Result<Transaction<'_>> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

fn insert_counter(
    conn: &Connection,
    owner: &CounterOwner,
    transaction_id: &str,
    note: &Note,
    status: NoteStatus,
) -> Result<()> {
    conn.execute(
        "INSERT INTO counter (transaction_id, user_serial, currency_serial, serial, name, value, status, application_data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            transaction_id,
            owner.user_serial,
            owner.currency_serial,
            note.serial,
            note.name,
            note.value,
            status,
            owner.application_data,
        ],
    )?;
    Ok(())
}

fn select_committed(
    conn: &Connection,
    currency_serial: CurrencySerial,
    transaction_id: Option<&str>,
) -> Result<Option<CashOutNote>> {
    let note = conn
        .query_row(
            "SELECT counter.user_serial, currencies.url, counter.serial, counter.name, counter.value, counter.application_data
             FROM counter JOIN currencies ON currencies.serial = counter.currency_serial
             WHERE counter.currency_serial = ?1
               AND counter.status = ?2
               AND (?3 IS NULL OR counter.transaction_id = ?3)
             ORDER BY counter.rowid
             LIMIT 1",
            params![currency_serial, NoteStatus::Committed, transaction_id],
            |row| {
                Ok(CashOutNote {
                    user_serial: row.get(0)?,
                    url: row.get(1)?,
                    serial: row.get(2)?,
                    name: row.get(3)?,
                    value: row.get(4)?,
                    application_data: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(note)
}

fn ensure_single_safe(conn: &Connection, currency_serial: CurrencySerial) -> Result<()> {
    let rows: i64 = conn.query_row(
        "SELECT COUNT(*) FROM safe WHERE currency_serial = ?1",
        [currency_serial],
        |row| row.get(0),
    )?;
    if rows > 1 {
        debug!(currency_serial, rows, "more than one safe note");
        return Err(CashierError::SafeIntegrity(format!(
            "safe holds {rows} notes for currency {currency_serial}"
        )));
    }
    Ok(())
}
