//! # Ledger Ingest
//!
//! File ingestion and balance reconciliation for a personal-finance ledger.
//!
//! ## Features
//!
//! - **Ledger file parsing**: header-skipping comma-delimited records with exact decimal amounts
//! - **Reconciliation engine**: claim, stage, parse, validate and commit a file as one unit
//! - **Atomic balances**: per-account delta updates that stay correct under concurrent runs
//! - **File registry**: processing state and last error per uploaded file
//! - **Storage abstraction**: trait-based registry, ledger and object store with in-memory,
//!   SQLite and filesystem implementations
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ledger_ingest::{MemoryObjectStore, MemoryStorage, PipelineConfig, ReconciliationEngine};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), ledger_ingest::ReconcileError> {
//! let storage = MemoryStorage::new();
//! storage.open_account(1001, "Ana", "ana@example.com")?;
//!
//! let engine = ReconciliationEngine::new(
//!     Arc::new(storage.clone()),
//!     Arc::new(storage.clone()),
//!     Arc::new(MemoryObjectStore::new()),
//!     PipelineConfig::from_env(),
//! );
//!
//! engine
//!     .upload("jan.csv", b"Id,Account,Date,Amount\n1,1001,2024-01-05,25.10\n".to_vec())
//!     .await?;
//! let report = engine.process("jan.csv").await?;
//! assert_eq!(report.transactions.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod ledger;
pub mod reconciliation;
pub mod storage;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use reconciliation::*;
pub use storage::*;
pub use traits::*;
pub use types::*;
pub use utils::*;
