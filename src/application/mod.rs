//! Application layer orchestrating cash movement.
//!
//! [`cashier::Cashier`] is the entry point: it resolves currencies, holds the
//! per-currency lock from [`locks::LockManager`] and drives the exchanges with
//! the currency authority against the staging ledger.

pub mod cashier;
pub mod locks;
