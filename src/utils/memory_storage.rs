//! In-memory storage implementations for testing

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use uuid::Uuid;

use crate::traits::*;
use crate::types::*;

fn read<T>(lock: &RwLock<T>) -> LedgerResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| LedgerError::Storage("memory storage lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> LedgerResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| LedgerError::Storage("memory storage lock poisoned".to_string()))
}

/// In-memory account ledger and file registry for testing and development
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    accounts: Arc<RwLock<HashMap<AccountNumber, Account>>>,
    transactions: Arc<RwLock<Vec<Transaction>>>,
    files: Arc<RwLock<Vec<FileRecord>>>,
    fail_commits: Arc<AtomicBool>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an account with a zero balance
    pub fn open_account(
        &self,
        account_number: AccountNumber,
        client: &str,
        email: &str,
    ) -> LedgerResult<Account> {
        let mut accounts = write(&self.accounts)?;
        if accounts.contains_key(&account_number) {
            return Err(LedgerError::Validation(format!(
                "Account {} already exists",
                account_number
            )));
        }
        let account = Account::new(account_number, client.to_string(), email.to_string());
        accounts.insert(account_number, account.clone());
        Ok(account)
    }

    /// Make every following `commit_batch` fail (useful for testing)
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    fn with_file<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut FileRecord) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let mut files = write(&self.files)?;
        let record = files
            .iter_mut()
            .find(|file| file.name == name)
            .ok_or_else(|| LedgerError::FileNotFound(name.to_string()))?;
        let result = f(record)?;
        record.touch();
        Ok(result)
    }
}

#[async_trait]
impl FileRegistry for MemoryStorage {
    async fn register(&self, name: &str, location: &str) -> LedgerResult<FileRecord> {
        let mut files = write(&self.files)?;
        if let Some(existing) = files.iter_mut().find(|file| file.name == name) {
            if !existing.processed && !existing.processing {
                existing.location = location.to_string();
                existing.touch();
            }
            return Ok(existing.clone());
        }
        let record = FileRecord::new(name.to_string(), location.to_string());
        files.push(record.clone());
        Ok(record)
    }

    async fn lookup(&self, name: &str) -> LedgerResult<Option<FileRecord>> {
        Ok(read(&self.files)?
            .iter()
            .find(|file| file.name == name)
            .cloned())
    }

    async fn get(&self, id: Uuid) -> LedgerResult<Option<FileRecord>> {
        Ok(read(&self.files)?.iter().find(|file| file.id == id).cloned())
    }

    async fn list(&self, offset: usize, limit: usize) -> LedgerResult<Vec<FileRecord>> {
        Ok(read(&self.files)?
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn claim(&self, name: &str) -> LedgerResult<ClaimOutcome> {
        let mut files = write(&self.files)?;
        let Some(record) = files.iter_mut().find(|file| file.name == name) else {
            return Ok(ClaimOutcome::NotFound);
        };

        Ok(match record.state() {
            FileState::Processed => ClaimOutcome::AlreadyProcessed,
            FileState::Processing => ClaimOutcome::InProgress,
            FileState::Unprocessed | FileState::Failed => {
                record.processing = true;
                record.touch();
                ClaimOutcome::Claimed(record.clone())
            }
        })
    }

    async fn release(&self, name: &str) -> LedgerResult<()> {
        self.with_file(name, |record| {
            record.processing = false;
            Ok(())
        })
    }

    async fn mark_processed(&self, name: &str) -> LedgerResult<()> {
        self.with_file(name, |record| {
            if record.processed {
                return Err(LedgerError::InvalidState(format!(
                    "file {} is already processed",
                    name
                )));
            }
            record.processed = true;
            record.processing = false;
            record.output = None;
            Ok(())
        })
    }

    async fn mark_failed(&self, name: &str, output: &str) -> LedgerResult<()> {
        self.with_file(name, |record| {
            if record.processed {
                return Err(LedgerError::InvalidState(format!(
                    "file {} is already processed",
                    name
                )));
            }
            record.processing = false;
            record.output = Some(output.to_string());
            Ok(())
        })
    }
}

#[async_trait]
impl AccountLedger for MemoryStorage {
    async fn exists(&self, account_number: AccountNumber) -> LedgerResult<bool> {
        Ok(read(&self.accounts)?.contains_key(&account_number))
    }

    async fn balance(&self, account_number: AccountNumber) -> LedgerResult<BigDecimal> {
        read(&self.accounts)?
            .get(&account_number)
            .map(|account| account.balance.clone())
            .ok_or(LedgerError::AccountNotFound(account_number))
    }

    async fn apply_delta(
        &self,
        account_number: AccountNumber,
        amount: &BigDecimal,
    ) -> LedgerResult<BigDecimal> {
        let mut accounts = write(&self.accounts)?;
        let account = accounts
            .get_mut(&account_number)
            .ok_or(LedgerError::AccountNotFound(account_number))?;
        account.apply_delta(amount);
        Ok(account.balance.clone())
    }

    async fn commit_batch(
        &self,
        source_file: &str,
        records: &[LedgerRecord],
    ) -> LedgerResult<Vec<Transaction>> {
        // Lock order: files, accounts, then transactions
        let mut files = write(&self.files)?;
        let mut accounts = write(&self.accounts)?;
        let mut transactions = write(&self.transactions)?;

        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(LedgerError::Storage("simulated commit failure".to_string()));
        }

        let file = files
            .iter_mut()
            .find(|file| file.name == source_file && file.processing && !file.processed)
            .ok_or_else(|| {
                LedgerError::InvalidState(format!(
                    "file {} is not claimed for processing",
                    source_file
                ))
            })?;

        if let Some(missing) = records
            .iter()
            .find(|record| !accounts.contains_key(&record.account_number))
        {
            return Err(LedgerError::AccountNotFound(missing.account_number));
        }

        let mut committed = Vec::with_capacity(records.len());
        for record in records {
            if let Some(account) = accounts.get_mut(&record.account_number) {
                account.apply_delta(&record.amount);
            }
            committed.push(Transaction::from_record(record, source_file));
        }
        transactions.extend(committed.iter().cloned());

        file.processed = true;
        file.processing = false;
        file.output = None;
        file.touch();

        Ok(committed)
    }

    async fn transactions(
        &self,
        account_number: Option<AccountNumber>,
    ) -> LedgerResult<Vec<Transaction>> {
        Ok(read(&self.transactions)?
            .iter()
            .filter(|txn| account_number.is_none_or(|n| txn.account_number == n))
            .cloned()
            .collect())
    }
}

/// In-memory object store with simulated outages, for testing
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<(String, String), Vec<u8>>>>,
    unavailable: Arc<AtomicBool>,
    latency: Option<Duration>,
    gets: Arc<AtomicUsize>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every call fail with `StorageError::Unavailable` until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `get` calls served or attempted
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    async fn check_available(&self) -> Result<(), StorageError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "simulated object store outage".to_string(),
            ));
        }
        Ok(())
    }

    fn objects(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<(String, String), Vec<u8>>>, StorageError> {
        self.objects
            .write()
            .map_err(|_| StorageError::Unavailable("object map lock poisoned".to_string()))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        self.check_available().await?;
        self.objects()?
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_available().await?;
        self.objects()?
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}
