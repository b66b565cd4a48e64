//! Domain types and the ports the cashier talks to.

pub mod cash;
pub mod note;
pub mod ports;
