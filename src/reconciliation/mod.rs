//! Reconciliation of uploaded ledger files into transactions and balances

pub mod engine;
pub mod staging;

pub use engine::*;
pub use staging::*;
