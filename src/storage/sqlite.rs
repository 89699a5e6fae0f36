//! SQLite-backed account ledger and file registry
//!
//! Balances and amounts are stored as decimal text. Every mutation that reads
//! before it writes runs inside an `IMMEDIATE` transaction, which takes the
//! database write lock up front, so concurrent runs touching the same account
//! are serialized.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::traits::*;
use crate::types::*;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    account_number INTEGER PRIMARY KEY,
    client         TEXT NOT NULL,
    email          TEXT NOT NULL UNIQUE,
    balance        TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS transactions (
    seq            INTEGER PRIMARY KEY AUTOINCREMENT,
    id             TEXT NOT NULL UNIQUE,
    account_number INTEGER NOT NULL REFERENCES accounts(account_number),
    date           TEXT NOT NULL,
    amount         TEXT NOT NULL,
    source_file    TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_number);

CREATE TABLE IF NOT EXISTS files (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,
    name       TEXT NOT NULL UNIQUE,
    location   TEXT NOT NULL,
    processed  INTEGER NOT NULL DEFAULT 0,
    processing INTEGER NOT NULL DEFAULT 0,
    output     TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

const FILE_COLUMNS: &str =
    "id, name, location, processed, processing, output, created_at, updated_at";

const TRANSACTION_COLUMNS: &str =
    "id, account_number, date, amount, source_file, created_at, updated_at";

/// Relational store shared by the registry and ledger traits
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> LedgerResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> LedgerResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an account with a zero balance
    pub async fn open_account(
        &self,
        account_number: AccountNumber,
        client: &str,
        email: &str,
    ) -> LedgerResult<Account> {
        let account = Account::new(account_number, client.to_string(), email.to_string());
        let row = account.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO accounts (account_number, client, email, balance, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    to_sql_account(row.account_number)?,
                    row.client,
                    row.email,
                    row.balance.to_string(),
                    row.created_at,
                    row.updated_at
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(account)
    }

    /// Run blocking database work off the async executor
    async fn with_conn<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut Connection) -> LedgerResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| LedgerError::Storage("sqlite connection lock poisoned".to_string()))?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| LedgerError::Storage(format!("sqlite task failed: {}", e)))?
    }
}

fn to_sql_account(account_number: AccountNumber) -> LedgerResult<i64> {
    i64::try_from(account_number).map_err(|_| {
        LedgerError::Validation(format!(
            "Account number {} exceeds storage range",
            account_number
        ))
    })
}

fn parse_decimal(column: &str, value: &str) -> LedgerResult<BigDecimal> {
    BigDecimal::from_str(value)
        .map_err(|e| LedgerError::Storage(format!("corrupt {} value {:?}: {}", column, value, e)))
}

fn parse_uuid(value: &str) -> LedgerResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| LedgerError::Storage(format!("corrupt id {:?}: {}", value, e)))
}

type FileRow = (
    String,
    String,
    String,
    bool,
    bool,
    Option<String>,
    NaiveDateTime,
    NaiveDateTime,
);

fn file_from_row(row: FileRow) -> LedgerResult<FileRecord> {
    let (id, name, location, processed, processing, output, created_at, updated_at) = row;
    Ok(FileRecord {
        id: parse_uuid(&id)?,
        name,
        location,
        processed,
        processing,
        output,
        created_at,
        updated_at,
    })
}

fn read_file_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn find_file_by_name(conn: &Connection, name: &str) -> LedgerResult<Option<FileRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM files WHERE name = ?1", FILE_COLUMNS),
        params![name],
        read_file_row,
    )
    .optional()?
    .map(file_from_row)
    .transpose()
}

type TransactionRow = (
    String,
    i64,
    NaiveDate,
    String,
    Option<String>,
    NaiveDateTime,
    NaiveDateTime,
);

fn transaction_from_row(row: TransactionRow) -> LedgerResult<Transaction> {
    let (id, account_number, date, amount, source_file, created_at, updated_at) = row;
    Ok(Transaction {
        id: parse_uuid(&id)?,
        account_number: AccountNumber::try_from(account_number)
            .map_err(|_| LedgerError::Storage(format!("corrupt account {}", account_number)))?,
        date,
        amount: parse_decimal("amount", &amount)?,
        source_file,
        created_at,
        updated_at,
    })
}

/// Add `amount` to an account balance; callers hold a write transaction
fn add_to_balance(
    conn: &Connection,
    account_number: AccountNumber,
    amount: &BigDecimal,
) -> LedgerResult<BigDecimal> {
    let key = i64::try_from(account_number)
        .map_err(|_| LedgerError::AccountNotFound(account_number))?;
    let current: String = conn
        .query_row(
            "SELECT balance FROM accounts WHERE account_number = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(LedgerError::AccountNotFound(account_number))?;

    let balance = parse_decimal("balance", &current)? + amount;
    conn.execute(
        "UPDATE accounts SET balance = ?1, updated_at = ?2 WHERE account_number = ?3",
        params![balance.to_string(), chrono::Utc::now().naive_utc(), key],
    )?;
    Ok(balance)
}

fn insert_transaction(conn: &Connection, txn: &Transaction) -> LedgerResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO transactions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            TRANSACTION_COLUMNS
        ),
        params![
            txn.id.to_string(),
            to_sql_account(txn.account_number)?,
            txn.date,
            txn.amount.to_string(),
            txn.source_file,
            txn.created_at,
            txn.updated_at
        ],
    )?;
    Ok(())
}

#[async_trait]
impl FileRegistry for SqliteStore {
    async fn register(&self, name: &str, location: &str) -> LedgerResult<FileRecord> {
        let record = FileRecord::new(name.to_string(), location.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO files ({}) VALUES (?1, ?2, ?3, 0, 0, NULL, ?4, ?5)
                     ON CONFLICT(name) DO UPDATE SET
                         location = excluded.location,
                         updated_at = excluded.updated_at
                     WHERE files.processed = 0 AND files.processing = 0",
                    FILE_COLUMNS
                ),
                params![
                    record.id.to_string(),
                    record.name,
                    record.location,
                    record.created_at,
                    record.updated_at
                ],
            )?;
            find_file_by_name(conn, &record.name)?
                .ok_or_else(|| LedgerError::FileNotFound(record.name.clone()))
        })
        .await
    }

    async fn lookup(&self, name: &str) -> LedgerResult<Option<FileRecord>> {
        let name = name.to_string();
        self.with_conn(move |conn| find_file_by_name(conn, &name))
            .await
    }

    async fn get(&self, id: Uuid) -> LedgerResult<Option<FileRecord>> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM files WHERE id = ?1", FILE_COLUMNS),
                params![id.to_string()],
                read_file_row,
            )
            .optional()?
            .map(file_from_row)
            .transpose()
        })
        .await
    }

    async fn list(&self, offset: usize, limit: usize) -> LedgerResult<Vec<FileRecord>> {
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM files ORDER BY seq LIMIT ?1 OFFSET ?2",
                FILE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![limit, offset], read_file_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(file_from_row).collect()
        })
        .await
    }

    async fn claim(&self, name: &str) -> LedgerResult<ClaimOutcome> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(mut record) = find_file_by_name(&tx, &name)? else {
                return Ok(ClaimOutcome::NotFound);
            };
            let outcome = match record.state() {
                FileState::Processed => ClaimOutcome::AlreadyProcessed,
                FileState::Processing => ClaimOutcome::InProgress,
                FileState::Unprocessed | FileState::Failed => {
                    record.processing = true;
                    record.touch();
                    tx.execute(
                        "UPDATE files SET processing = 1, updated_at = ?1
                         WHERE name = ?2 AND processed = 0 AND processing = 0",
                        params![record.updated_at, name],
                    )?;
                    ClaimOutcome::Claimed(record)
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn release(&self, name: &str) -> LedgerResult<()> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE files SET processing = 0, updated_at = ?1 WHERE name = ?2",
                params![chrono::Utc::now().naive_utc(), name],
            )?;
            if changed == 0 {
                return Err(LedgerError::FileNotFound(name));
            }
            Ok(())
        })
        .await
    }

    async fn mark_processed(&self, name: &str) -> LedgerResult<()> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let record = find_file_by_name(&tx, &name)?
                .ok_or_else(|| LedgerError::FileNotFound(name.clone()))?;
            if record.processed {
                return Err(LedgerError::InvalidState(format!(
                    "file {} is already processed",
                    name
                )));
            }
            tx.execute(
                "UPDATE files SET processed = 1, processing = 0, output = NULL, updated_at = ?1
                 WHERE name = ?2",
                params![chrono::Utc::now().naive_utc(), name],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn mark_failed(&self, name: &str, output: &str) -> LedgerResult<()> {
        let name = name.to_string();
        let output = output.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let record = find_file_by_name(&tx, &name)?
                .ok_or_else(|| LedgerError::FileNotFound(name.clone()))?;
            if record.processed {
                return Err(LedgerError::InvalidState(format!(
                    "file {} is already processed",
                    name
                )));
            }
            tx.execute(
                "UPDATE files SET processing = 0, output = ?1, updated_at = ?2 WHERE name = ?3",
                params![output, chrono::Utc::now().naive_utc(), name],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl AccountLedger for SqliteStore {
    async fn exists(&self, account_number: AccountNumber) -> LedgerResult<bool> {
        // Numbers beyond the INTEGER range can never have been stored
        let Ok(key) = i64::try_from(account_number) else {
            return Ok(false);
        };
        self.with_conn(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM accounts WHERE account_number = ?1",
                    params![key],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn balance(&self, account_number: AccountNumber) -> LedgerResult<BigDecimal> {
        self.with_conn(move |conn| {
            let balance: String = conn
                .query_row(
                    "SELECT balance FROM accounts WHERE account_number = ?1",
                    params![to_sql_account(account_number)?],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(LedgerError::AccountNotFound(account_number))?;
            parse_decimal("balance", &balance)
        })
        .await
    }

    async fn apply_delta(
        &self,
        account_number: AccountNumber,
        amount: &BigDecimal,
    ) -> LedgerResult<BigDecimal> {
        let amount = amount.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let balance = add_to_balance(&tx, account_number, &amount)?;
            tx.commit()?;
            Ok(balance)
        })
        .await
    }

    async fn commit_batch(
        &self,
        source_file: &str,
        records: &[LedgerRecord],
    ) -> LedgerResult<Vec<Transaction>> {
        let committed: Vec<Transaction> = records
            .iter()
            .map(|record| Transaction::from_record(record, source_file))
            .collect();
        let source_file = source_file.to_string();
        self.with_conn(move |conn| {
            // Dropping `tx` on an early return rolls the whole batch back
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let settled = tx.execute(
                "UPDATE files SET processed = 1, processing = 0, output = NULL, updated_at = ?1
                 WHERE name = ?2 AND processed = 0 AND processing = 1",
                params![chrono::Utc::now().naive_utc(), source_file],
            )?;
            if settled == 0 {
                return Err(LedgerError::InvalidState(format!(
                    "file {} is not claimed for processing",
                    source_file
                )));
            }
            for txn in &committed {
                add_to_balance(&tx, txn.account_number, &txn.amount)?;
                insert_transaction(&tx, txn)?;
            }
            tx.commit()?;
            Ok(committed)
        })
        .await
    }

    async fn transactions(
        &self,
        account_number: Option<AccountNumber>,
    ) -> LedgerResult<Vec<Transaction>> {
        let account = account_number.map(to_sql_account).transpose()?;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM transactions
                 WHERE ?1 IS NULL OR account_number = ?1
                 ORDER BY seq",
                TRANSACTION_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![account], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<TransactionRow>>>()?;
            rows.into_iter().map(transaction_from_row).collect()
        })
        .await
    }
}
