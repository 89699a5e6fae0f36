//! Traits for the pipeline's storage collaborators

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use uuid::Uuid;

use crate::types::*;

/// Persisted metadata for uploaded ledger files
///
/// Implementations must make every mutation visible to the next call; the
/// engine relies on `claim` being an atomic check-and-set so that two runs
/// for the same file cannot both proceed.
#[async_trait]
pub trait FileRegistry: Send + Sync {
    /// Register a file, or return the existing record
    ///
    /// The location of an existing record changes only while it is neither
    /// processed nor claimed.
    async fn register(&self, name: &str, location: &str) -> LedgerResult<FileRecord>;

    /// Find a file by name
    async fn lookup(&self, name: &str) -> LedgerResult<Option<FileRecord>>;

    /// Find a file by ID
    async fn get(&self, id: Uuid) -> LedgerResult<Option<FileRecord>>;

    /// List files in registration order
    async fn list(&self, offset: usize, limit: usize) -> LedgerResult<Vec<FileRecord>>;

    /// Take exclusive ownership of an unprocessed or failed file
    async fn claim(&self, name: &str) -> LedgerResult<ClaimOutcome>;

    /// Drop a claim without touching the processed flag or output
    ///
    /// Also clears claims left by a process that died mid-run.
    async fn release(&self, name: &str) -> LedgerResult<()>;

    /// Mark a file processed and clear its output, outside of a batch commit
    ///
    /// Fails with `InvalidState` if the file is already processed.
    async fn mark_processed(&self, name: &str) -> LedgerResult<()>;

    /// Record the error text of a failed run
    ///
    /// Fails with `InvalidState` if the file is already processed.
    async fn mark_failed(&self, name: &str, output: &str) -> LedgerResult<()>;
}

/// Account balances and the transactions booked against them
#[async_trait]
pub trait AccountLedger: Send + Sync {
    /// Check whether an account exists
    async fn exists(&self, account_number: AccountNumber) -> LedgerResult<bool>;

    /// Current balance of an account
    async fn balance(&self, account_number: AccountNumber) -> LedgerResult<BigDecimal>;

    /// Atomically add `amount` to the account balance, returning the new balance
    async fn apply_delta(
        &self,
        account_number: AccountNumber,
        amount: &BigDecimal,
    ) -> LedgerResult<BigDecimal>;

    /// Insert one transaction per record and apply every balance delta as a
    /// single atomic unit
    ///
    /// Records are committed in the given order. The same unit marks
    /// `source_file` processed in this store's file registry, and fails with
    /// `InvalidState` unless that file is currently claimed. If any account is
    /// missing or the store fails, nothing is persisted.
    async fn commit_batch(
        &self,
        source_file: &str,
        records: &[LedgerRecord],
    ) -> LedgerResult<Vec<Transaction>>;

    /// Transactions in creation order, optionally for a single account
    async fn transactions(
        &self,
        account_number: Option<AccountNumber>,
    ) -> LedgerResult<Vec<Transaction>>;
}

/// Remote blob storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `bucket`/`key`, replacing any existing object
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError>;

    /// Fetch the object stored under `bucket`/`key`
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;
}
