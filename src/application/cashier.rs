use super::locks::LockManager;
use crate::config::CashierConfig;
use crate::domain::cash::{CashCommand, CashIn, CashOut, CashOutCommit, CashOutcome, CashQuery};
use crate::domain::note::{CashOutNote, UserBalance};
use crate::domain::ports::{CurrencyAuthorityBox, LockProviderBox};
use crate::error::{CashierError, Result};
use crate::infrastructure::sqlite::SqliteStore;
use crate::infrastructure::sqlite::registry::CurrencyRegistry;
use crate::infrastructure::sqlite::staging::{CounterOwner, StagingLedger};
use tracing::{debug, error, info, warn};

/// Largest value a single cash-in or cash-out may move. Balances and melted
/// notes are sums of these, so they stay far from `i64` overflow.
pub const MAX_CASH_VALUE: i64 = 1 << 48;

/// Moves value between the local ledger and the currency authority.
///
/// Every cash-in and cash-out holds the lock of its currency from the first
/// read of the counter until the safe is updated. The lock guard is dropped on
/// every exit path, and failures are logged once, at the end of the sequence.
pub struct Cashier {
    registry: CurrencyRegistry,
    ledger: StagingLedger,
    locks: LockManager,
    authority: CurrencyAuthorityBox,
}

impl Cashier {
    /// Creates a new `Cashier` over a shared store.
    ///
    /// # Arguments
    ///
    /// * `config` - The `[cashier]` settings.
    /// * `store` - The relational store holding currencies, counter, safe and balances.
    /// * `authority` - Client of the currency authority.
    /// * `lock_provider` - Source of named lock handles.
    pub fn new(
        config: &CashierConfig,
        store: SqliteStore,
        authority: CurrencyAuthorityBox,
        lock_provider: LockProviderBox,
    ) -> Self {
        Self {
            registry: CurrencyRegistry::new(store.clone(), config.user_create),
            ledger: StagingLedger::new(store),
            locks: LockManager::new(lock_provider, config.acquire_timeout()),
            authority,
        }
    }

    pub fn ledger(&self) -> &StagingLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &CurrencyRegistry {
        &self.registry
    }

    /// Routes a decoded request to the matching operation.
    pub async fn dispatch(&self, command: CashCommand) -> Result<CashOutcome> {
        match command {
            CashCommand::In(request) => self.cash_in(&request).await.map(|()| CashOutcome::Ack),
            CashCommand::Out(request) => self.cash_out(&request).await.map(CashOutcome::Note),
            CashCommand::OutCommit(request) => self
                .cash_out_commit(&request)
                .map(CashOutcome::Acknowledged),
            CashCommand::Query(request) => self.cash_query(&request).map(|()| CashOutcome::Ack),
        }
    }

    /// Deposits the note of `request` into the user's balance.
    ///
    /// The note is melted with the note in the safe, if any, and the melted
    /// note replaces it once the authority confirms the exchange. A melt left
    /// unconfirmed by an earlier attempt with the same note is resumed instead.
    pub async fn cash_in(&self, request: &CashIn) -> Result<()> {
        debug!(user = request.user_serial, url = %request.note.url, value = request.note.value, "cash in");
        self.deposit(request)
            .await
            .inspect_err(|err| report_failure("cash in", &request.note.url, err))
    }

    async fn deposit(&self, request: &CashIn) -> Result<()> {
        check_value("cash in", request.note.value)?;
        let url = request.note.url.as_str();
        let currency_serial = self.registry.get_currency_serial(url)?;
        let _lock = self.locks.lock(currency_serial).await?;

        let transaction_id = match self
            .ledger
            .unresolved_cash_in(currency_serial, request.note.serial)?
        {
            Some(transaction_id) => {
                info!(%transaction_id, currency_serial, "resuming unconfirmed cash in");
                transaction_id
            }
            None => {
                let safe = self.ledger.safe_notes(currency_serial)?;
                if safe.len() > 1 {
                    return Err(CashierError::SafeIntegrity(format!(
                        "found {} safe notes for currency {currency_serial} instead of 0 or 1",
                        safe.len()
                    )));
                }
                let existing = safe.into_iter().next().map(|entry| entry.into_note(url));
                let exchange = self.authority.melt(&request.note, existing.as_ref()).await?;

                let mut consumed = vec![request.note.clone()];
                consumed.extend(existing);
                let owner = CounterOwner {
                    user_serial: request.user_serial,
                    currency_serial,
                    application_data: request.application_data.clone(),
                };
                self.ledger.record_exchange(
                    &owner,
                    &exchange.transaction_id,
                    &exchange.notes,
                    &consumed,
                )?;
                exchange.transaction_id
            }
        };

        self.authority.commit(url, &transaction_id).await?;
        self.ledger.promote_to_safe(
            &transaction_id,
            request.user_serial,
            currency_serial,
            request.note.value,
        )?;
        info!(%transaction_id, user = request.user_serial, currency_serial, value = request.note.value, "cash in complete");
        Ok(())
    }

    /// Withdraws `request.value` from the safe as a note for the user.
    ///
    /// The safe note is broken in two; the remainder goes back to the safe
    /// and the user note is returned once the authority confirms the break. A
    /// break left unconfirmed by an earlier attempt is resumed instead, and a
    /// collected note the client has not acknowledged with
    /// [`Cashier::cash_out_commit`] is handed out again without touching the
    /// safe.
    pub async fn cash_out(&self, request: &CashOut) -> Result<CashOutNote> {
        debug!(user = request.user_serial, url = %request.url, value = request.value, "cash out");
        self.withdraw(request)
            .await
            .inspect_err(|err| report_failure("cash out", &request.url, err))
    }

    async fn withdraw(&self, request: &CashOut) -> Result<CashOutNote> {
        check_value("cash out", request.value)?;
        let url = request.url.as_str();
        let currency_serial = self.registry.get_currency_serial(url)?;
        let _lock = self.locks.lock(currency_serial).await?;

        let transaction_id = match self.ledger.unresolved_cash_out(currency_serial)? {
            Some(transaction_id) => {
                info!(%transaction_id, currency_serial, "resuming unresolved cash out");
                transaction_id
            }
            None => {
                let mut safe = self.ledger.safe_notes(currency_serial)?;
                if safe.len() != 1 {
                    return Err(CashierError::SafeIntegrity(format!(
                        "found {} safe notes for currency {currency_serial} instead of exactly 1",
                        safe.len()
                    )));
                }
                let note = safe.remove(0).into_note(url);
                let remainder = note.value - request.value;
                if remainder < 0 {
                    return Err(CashierError::InsufficientFunds {
                        available: note.value,
                        requested: request.value,
                    });
                }
                let exchange = self
                    .authority
                    .break_note(&note, remainder, request.value)
                    .await?;

                let owner = CounterOwner {
                    user_serial: request.user_serial,
                    currency_serial,
                    application_data: request.application_data.clone(),
                };
                self.ledger
                    .record_break_result(&owner, request.value, &exchange)?
            }
        };

        self.authority.commit(url, &transaction_id).await?;
        if let Some(note) = self
            .ledger
            .collect_committed(currency_serial, Some(&transaction_id))?
        {
            info!(%transaction_id, user = note.user_serial, currency_serial, value = note.value, "redelivering unacknowledged note");
            return Ok(note);
        }
        let note = self.ledger.finalize_cash_out(currency_serial, &transaction_id)?;
        info!(%transaction_id, user = note.user_serial, currency_serial, value = note.value, "cash out complete");
        Ok(note)
    }

    /// Forgets the collected note the client acknowledged. Returns the number
    /// of pending rows removed; zero means nothing was pending.
    pub fn cash_out_commit(&self, request: &CashOutCommit) -> Result<usize> {
        debug!(reference = %request.reference, "cash out commit");
        let deleted = self.ledger.delete_committed(&request.reference)?;
        if deleted == 0 {
            debug!(reference = %request.reference, "no collected note pending");
        }
        Ok(deleted)
    }

    /// Tells whether any counter entry carries `request.application_data`.
    pub fn cash_query(&self, request: &CashQuery) -> Result<()> {
        debug!(application_data = %request.application_data, "cash query");
        if self.ledger.count_tagged(&request.application_data)? > 0 {
            Ok(())
        } else {
            Err(CashierError::NotFound {
                application_data: request.application_data.clone(),
            })
        }
    }

    pub fn balances(&self) -> Result<Vec<UserBalance>> {
        self.ledger.balances()
    }

    /// Releases every lock handle. Called once at shutdown.
    pub fn close(&self) {
        self.locks.close();
    }
}

fn check_value(operation: &str, value: i64) -> Result<()> {
    if value <= 0 || value > MAX_CASH_VALUE {
        return Err(CashierError::ValidationError(format!(
            "{operation} value {value} is not between 1 and {MAX_CASH_VALUE}"
        )));
    }
    Ok(())
}

fn report_failure(operation: &str, url: &str, err: &CashierError) {
    match err {
        CashierError::SafeIntegrity(_) => {
            error!(operation, url, %err, "safe integrity violated")
        }
        err if !err.is_fatal() => debug!(operation, url, %err, "nothing to do"),
        err => warn!(operation, url, %err, "cash operation failed"),
    }
}
