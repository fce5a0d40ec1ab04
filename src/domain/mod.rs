//! Domain types and rules. Nothing in here performs I/O.

pub mod audit;
pub mod payment;
pub mod ports;
pub mod signal;
pub mod tier;
pub mod verification;
