//! Application layer orchestrating the payment lifecycle.
//!
//! `ReconciliationEngine` is the single entry point for creating payments and folding
//! gateway signals into them. `EscalationWatchdog` sweeps for payments that never
//! reached a terminal status.

pub mod engine;
pub mod report;
pub mod watchdog;
