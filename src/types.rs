//! Core types and data structures for the ingestion pipeline

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Account numbers are non-negative integers
pub type AccountNumber = u64;

/// Account as seen by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account number
    pub account_number: AccountNumber,
    /// Account holder name
    pub client: String,
    /// Contact email, unique per account
    pub email: String,
    /// Current balance
    pub balance: BigDecimal,
    /// When the account was created
    pub created_at: NaiveDateTime,
    /// When the account was last updated
    pub updated_at: NaiveDateTime,
}

impl Account {
    /// Create a new account with a zero balance
    pub fn new(account_number: AccountNumber, client: String, email: String) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            account_number,
            client,
            email,
            balance: BigDecimal::from(0),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a signed amount to the balance
    pub fn apply_delta(&mut self, amount: &BigDecimal) {
        self.balance += amount;
        self.updated_at = chrono::Utc::now().naive_utc();
    }
}

/// One parsed line of a ledger file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// 1-based line in the source file (header = 1)
    pub line: u64,
    pub account_number: AccountNumber,
    pub date: NaiveDate,
    /// Negative amounts are debits, positive amounts credits
    pub amount: BigDecimal,
}

/// Durable unit of ledger history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier for the transaction
    pub id: Uuid,
    /// Account the amount was booked against
    pub account_number: AccountNumber,
    /// Booking date
    pub date: NaiveDate,
    /// Signed amount
    pub amount: BigDecimal,
    /// Ledger file the transaction was imported from, if any
    pub source_file: Option<String>,
    /// When the transaction was created
    pub created_at: NaiveDateTime,
    /// When the transaction was last updated
    pub updated_at: NaiveDateTime,
}

impl Transaction {
    /// Build a transaction from an imported ledger record
    pub fn from_record(record: &LedgerRecord, source_file: &str) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: Uuid::new_v4(),
            account_number: record.account_number,
            date: record.date,
            amount: record.amount.clone(),
            source_file: Some(source_file.to_string()),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Processing state of an uploaded file, derived from its persisted flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileState {
    /// Registered, never attempted or attempt abandoned before any mutation
    Unprocessed,
    /// Claimed by a running reconciliation
    Processing,
    /// Committed; never processed again
    Processed,
    /// Last attempt failed, see `FileRecord::output`
    Failed,
}

/// Metadata for one uploaded ledger file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    /// Unique file name, also the object key suffix
    pub name: String,
    /// Logical storage backend tag
    pub location: String,
    pub processed: bool,
    /// Claim flag held while a run owns the file
    pub processing: bool,
    /// Error text from the last failed run
    pub output: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl FileRecord {
    /// Create a new unprocessed record
    pub fn new(name: String, location: String) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: Uuid::new_v4(),
            name,
            location,
            processed: false,
            processing: false,
            output: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> FileState {
        if self.processed {
            FileState::Processed
        } else if self.processing {
            FileState::Processing
        } else if self.output.is_some() {
            FileState::Failed
        } else {
            FileState::Unprocessed
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().naive_utc();
    }
}

/// Result of trying to take exclusive ownership of a file
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller now owns the file; carries the record as it was claimed
    Claimed(FileRecord),
    NotFound,
    AlreadyProcessed,
    /// Another run holds the claim
    InProgress,
}

/// Summary of a successful reconciliation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessReport {
    /// Name of the processed file
    pub file: String,
    /// Transactions committed, in file order
    pub transactions: Vec<Transaction>,
    /// Balances of every touched account after the commit
    pub balances: BTreeMap<AccountNumber, BigDecimal>,
}

/// Errors raised by the registry and account stores
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Account not found: {0}")]
    AccountNotFound(AccountNumber),
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type for store operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors raised by object storage backends
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },
    #[error("object storage unavailable: {0}")]
    Unavailable(String),
    #[error("object storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What was wrong with a ledger file line
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("missing header line")]
    MissingHeader,
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("invalid account number {0:?}")]
    InvalidAccount(String),
    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("invalid amount {0:?}")]
    InvalidAmount(String),
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// First malformed line of a ledger file
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {kind} (content: {content:?})")]
pub struct ParseError {
    pub line: u64,
    /// Raw line content as read from the file
    pub content: String,
    pub kind: ParseErrorKind,
}

/// Outcome taxonomy of the reconciliation engine
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("file {0} not found")]
    FileNotFound(String),
    #[error("file {0} has already been processed")]
    AlreadyProcessed(String),
    #[error("file {0} is already being processed")]
    InProgress(String),
    #[error("invalid file name {name:?}: {reason}")]
    InvalidFileName { name: String, reason: String },
    #[error("download of {name} failed: {source}")]
    Storage {
        name: String,
        #[source]
        source: StorageError,
    },
    #[error("staging of {name} failed: {source}")]
    Staging {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse error in {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: ParseError,
    },
    #[error("account {account_number} not found (line {line})")]
    AccountNotFound {
        account_number: AccountNumber,
        line: u64,
    },
    #[error("persistence error: {0}")]
    Persistence(#[from] LedgerError),
    #[error("reconciliation of {name} aborted: {reason}")]
    Aborted { name: String, reason: String },
}

impl ReconcileError {
    /// HTTP-equivalent status for the trigger surface
    pub fn status_code(&self) -> u16 {
        match self {
            ReconcileError::FileNotFound(_) => 404,
            ReconcileError::AlreadyProcessed(_) | ReconcileError::InvalidFileName { .. } => 400,
            ReconcileError::InProgress(_) => 409,
            ReconcileError::Storage {
                source: StorageError::Unavailable(_),
                ..
            } => 503,
            ReconcileError::Storage { .. } => 502,
            ReconcileError::Parse { .. } | ReconcileError::AccountNotFound { .. } => 422,
            ReconcileError::Persistence(_)
            | ReconcileError::Staging { .. }
            | ReconcileError::Aborted { .. } => 500,
        }
    }

    /// Whether the failure was recorded on the file record
    pub fn is_recorded(&self) -> bool {
        matches!(
            self,
            ReconcileError::Parse { .. }
                | ReconcileError::AccountNotFound { .. }
                | ReconcileError::Persistence(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_state_derivation() {
        let mut record = FileRecord::new("jan.csv".to_string(), "object-store".to_string());
        assert_eq!(record.state(), FileState::Unprocessed);

        record.processing = true;
        assert_eq!(record.state(), FileState::Processing);

        record.processing = false;
        record.output = Some("account 9 not found (line 4)".to_string());
        assert_eq!(record.state(), FileState::Failed);

        record.output = None;
        record.processed = true;
        assert_eq!(record.state(), FileState::Processed);
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ReconcileError::FileNotFound("a.csv".to_string()).status_code(),
            404
        );
        assert_eq!(
            ReconcileError::AlreadyProcessed("a.csv".to_string()).status_code(),
            400
        );
        let unavailable = ReconcileError::Storage {
            name: "a.csv".to_string(),
            source: StorageError::Unavailable("bucket offline".to_string()),
        };
        assert_eq!(unavailable.status_code(), 503);
        assert!(!unavailable.is_recorded());

        let missing = ReconcileError::AccountNotFound {
            account_number: 9,
            line: 4,
        };
        assert_eq!(missing.status_code(), 422);
        assert!(missing.is_recorded());
        assert_eq!(missing.to_string(), "account 9 not found (line 4)");
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError {
            line: 3,
            content: "2,1001,2024-01-02,abc".to_string(),
            kind: ParseErrorKind::InvalidAmount("abc".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "line 3: invalid amount \"abc\" (content: \"2,1001,2024-01-02,abc\")"
        );
    }
}
