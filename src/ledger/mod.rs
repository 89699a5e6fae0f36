//! Ledger file format

pub mod parser;

pub use parser::parse;
