use crate::domain::note::{UserBalance, UserSerial};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct BalanceRecord<'a> {
    user: UserSerial,
    currency: &'a str,
    amount: i64,
}

/// Writes user balances as `user,currency,amount` rows, the currency being
/// its url.
pub struct BalanceWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> BalanceWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_balances(&mut self, balances: &[UserBalance]) -> Result<()> {
        if balances.is_empty() {
            self.writer.write_record(["user", "currency", "amount"])?;
        }
        for balance in balances {
            self.writer.serialize(BalanceRecord {
                user: balance.user_serial,
                currency: &balance.url,
                amount: balance.amount,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
