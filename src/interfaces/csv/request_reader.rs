use crate::domain::cash::{CashCommand, CashIn, CashOut, CashOutCommit, CashQuery};
use crate::domain::note::{Note, NoteSerial, UserSerial};
use crate::error::{CashierError, Result};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum RequestOp {
    CashIn,
    CashOut,
    CashOutCommit,
    CashQuery,
}

/// One row of a request file. Which columns are required depends on `op`.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct RequestRecord {
    pub op: RequestOp,
    #[serde(default)]
    pub user: Option<UserSerial>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub value: Option<i64>,
    #[serde(default)]
    pub serial: Option<NoteSerial>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub application_data: Option<String>,
}

impl TryFrom<RequestRecord> for CashCommand {
    type Error = CashierError;

    fn try_from(record: RequestRecord) -> Result<Self> {
        let op = record.op;
        let application_data = record.application_data.unwrap_or_default();
        let command = match op {
            RequestOp::CashIn => CashCommand::In(CashIn {
                user_serial: required(op, "user", record.user)?,
                note: Note::new(
                    required(op, "url", record.url)?,
                    required(op, "serial", record.serial)?,
                    required(op, "name", record.name)?,
                    required(op, "value", record.value)?,
                ),
                application_data,
            }),
            RequestOp::CashOut => CashCommand::Out(CashOut {
                user_serial: required(op, "user", record.user)?,
                url: required(op, "url", record.url)?,
                value: required(op, "value", record.value)?,
                application_data,
            }),
            RequestOp::CashOutCommit => CashCommand::OutCommit(CashOutCommit {
                reference: required(op, "name", record.name)?,
            }),
            RequestOp::CashQuery => CashCommand::Query(CashQuery { application_data }),
        };
        Ok(command)
    }
}

fn required<T>(op: RequestOp, column: &str, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| CashierError::ValidationError(format!("{op:?} request without {column}")))
}

/// Reads cash requests from a CSV source.
///
/// Columns are `op,user,url,value,serial,name,application_data`; whitespace
/// is trimmed and trailing empty columns may be left out.
pub struct RequestReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> RequestReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily decodes each row into a [`CashCommand`]. A bad row yields an
    /// error and does not stop the iteration.
    pub fn requests(self) -> impl Iterator<Item = Result<CashCommand>> {
        self.reader.into_deserialize::<RequestRecord>().map(|result| {
            result
                .map_err(CashierError::from)
                .and_then(CashCommand::try_from)
        })
    }
}
