//! Batch request input and balance report output in CSV form.

pub mod balance_writer;
pub mod request_reader;
