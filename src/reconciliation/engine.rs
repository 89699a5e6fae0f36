//! Orchestration of a single file's reconciliation run
//!
//! A run moves through `Start → Validated → Downloaded → Parsed → Committing →
//! Done`, or stops in `Failed`. Failures found before anything durable could
//! have changed (missing file, already processed, storage outage) leave the
//! file record as it was. Failures found afterwards are written to the file
//! record's output. Transactions, balance deltas and the record's `Processed`
//! state are committed as one batch, so a failed run never leaves part of a
//! file in the ledger and a committed file is never left claimed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::ledger::parser;
use crate::reconciliation::staging::StagedFile;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{page_size, validate_file_name};

/// Steps of a reconciliation run, used for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Start,
    Validated,
    Downloaded,
    Parsed,
    Committing,
    Done,
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            RunStage::Start => "start",
            RunStage::Validated => "validated",
            RunStage::Downloaded => "downloaded",
            RunStage::Parsed => "parsed",
            RunStage::Committing => "committing",
            RunStage::Done => "done",
            RunStage::Failed => "failed",
        };
        f.write_str(stage)
    }
}

/// Turns uploaded ledger files into committed transactions
#[derive(Clone)]
pub struct ReconciliationEngine {
    registry: Arc<dyn FileRegistry>,
    ledger: Arc<dyn AccountLedger>,
    store: Arc<dyn ObjectStore>,
    config: Arc<PipelineConfig>,
}

impl ReconciliationEngine {
    /// Create an engine over the given collaborators
    ///
    /// `registry` and `ledger` must be backed by the same store: a batch
    /// commit also settles the file record.
    pub fn new(
        registry: Arc<dyn FileRegistry>,
        ledger: Arc<dyn AccountLedger>,
        store: Arc<dyn ObjectStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            ledger,
            store,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Store a ledger file and register it for processing
    ///
    /// Uploading again under the same name replaces the stored bytes and keeps
    /// the existing record, unless that file was already processed. The bytes
    /// are written under the file's claim, so they never change underneath a
    /// run.
    pub async fn upload(&self, name: &str, body: Vec<u8>) -> Result<FileRecord, ReconcileError> {
        validate_file_name(name)?;

        self.registry.register(name, &self.config.location).await?;
        match self.registry.claim(name).await? {
            ClaimOutcome::Claimed(_) => {}
            ClaimOutcome::NotFound => return Err(ReconcileError::FileNotFound(name.to_string())),
            ClaimOutcome::AlreadyProcessed => {
                return Err(ReconcileError::AlreadyProcessed(name.to_string()))
            }
            ClaimOutcome::InProgress => return Err(ReconcileError::InProgress(name.to_string())),
        }

        let key = self.config.object_key(name);
        let size = body.len();
        let stored = self.store.put(&self.config.bucket, &key, body).await;
        self.registry.release(name).await?;
        stored.map_err(|source| ReconcileError::Storage {
            name: name.to_string(),
            source,
        })?;

        let record = self
            .registry
            .lookup(name)
            .await?
            .ok_or_else(|| ReconcileError::FileNotFound(name.to_string()))?;
        info!(file = name, id = %record.id, bytes = size, "registered ledger file");
        Ok(record)
    }

    /// Clear a claim left behind by a run that never finished
    ///
    /// A run that is still alive loses the right to commit once its claim is
    /// released.
    pub async fn release_claim(&self, name: &str) -> Result<FileRecord, ReconcileError> {
        validate_file_name(name)?;

        let record = self
            .registry
            .lookup(name)
            .await?
            .ok_or_else(|| ReconcileError::FileNotFound(name.to_string()))?;
        match record.state() {
            FileState::Processed => Err(ReconcileError::AlreadyProcessed(name.to_string())),
            FileState::Unprocessed | FileState::Failed => Ok(record),
            FileState::Processing => {
                self.registry.release(name).await?;
                warn!(file = name, id = %record.id, "released stale claim");
                self.registry
                    .lookup(name)
                    .await?
                    .ok_or_else(|| ReconcileError::FileNotFound(name.to_string()))
            }
        }
    }

    /// Find a registered file by ID
    pub async fn find_file(&self, id: Uuid) -> Result<FileRecord, ReconcileError> {
        self.registry
            .get(id)
            .await?
            .ok_or_else(|| ReconcileError::FileNotFound(id.to_string()))
    }

    /// List registered files; `limit` defaults to 10 and is capped at 100
    pub async fn list_files(
        &self,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<FileRecord>, ReconcileError> {
        Ok(self.registry.list(offset, page_size(limit)).await?)
    }

    /// Process a registered file by name
    ///
    /// The run executes on its own task: if the caller stops waiting, the run
    /// still reaches a terminal state and releases its staging file.
    pub async fn process(&self, name: &str) -> Result<ProcessReport, ReconcileError> {
        let engine = self.clone();
        let file = name.to_string();
        tokio::spawn(async move { engine.run(&file).await })
            .await
            .map_err(|e| ReconcileError::Aborted {
                name: name.to_string(),
                reason: e.to_string(),
            })?
    }

    async fn run(&self, name: &str) -> Result<ProcessReport, ReconcileError> {
        validate_file_name(name)?;
        self.transition(name, RunStage::Start);

        match self.registry.claim(name).await? {
            ClaimOutcome::Claimed(_) => {}
            ClaimOutcome::NotFound => return Err(ReconcileError::FileNotFound(name.to_string())),
            ClaimOutcome::AlreadyProcessed => {
                warn!(file = name, "rejected: file already processed");
                return Err(ReconcileError::AlreadyProcessed(name.to_string()));
            }
            ClaimOutcome::InProgress => {
                warn!(file = name, "rejected: file is being processed by another run");
                return Err(ReconcileError::InProgress(name.to_string()));
            }
        }
        info!(file = name, "claimed ledger file");
        self.transition(name, RunStage::Validated);

        let result = match self.download(name).await {
            Ok(staged) => {
                self.transition(name, RunStage::Downloaded);
                self.reconcile(name, &staged).await
                // `staged` dropped here, removing the local copy
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(transactions) => self.finish(name, transactions).await,
            Err(err) => {
                self.transition(name, RunStage::Failed);
                self.settle_failure(name, &err).await;
                Err(err)
            }
        }
    }

    async fn download(&self, name: &str) -> Result<StagedFile, ReconcileError> {
        let staging = |source| ReconcileError::Staging {
            name: name.to_string(),
            source,
        };

        let staged = StagedFile::create(&self.config.staging_dir, name)
            .await
            .map_err(staging)?;

        let key = self.config.object_key(name);
        let body = self
            .store
            .get(&self.config.bucket, &key)
            .await
            .map_err(|source| ReconcileError::Storage {
                name: name.to_string(),
                source,
            })?;

        staged.write(&body).await.map_err(staging)?;
        debug!(file = name, path = %staged.path().display(), bytes = body.len(), "staged ledger file");
        Ok(staged)
    }

    async fn reconcile(
        &self,
        name: &str,
        staged: &StagedFile,
    ) -> Result<Vec<Transaction>, ReconcileError> {
        let raw = staged.read().await.map_err(|source| ReconcileError::Staging {
            name: name.to_string(),
            source,
        })?;

        let records = parser::parse(&raw).map_err(|source| ReconcileError::Parse {
            name: name.to_string(),
            source,
        })?;
        self.transition(name, RunStage::Parsed);
        debug!(file = name, records = records.len(), "parsed ledger file");

        for record in &records {
            if !self.ledger.exists(record.account_number).await? {
                return Err(ReconcileError::AccountNotFound {
                    account_number: record.account_number,
                    line: record.line,
                });
            }
        }

        self.transition(name, RunStage::Committing);
        self.ledger
            .commit_batch(name, &records)
            .await
            .map_err(|err| match err {
                // The account vanished between validation and commit
                LedgerError::AccountNotFound(account_number) => ReconcileError::AccountNotFound {
                    account_number,
                    line: records
                        .iter()
                        .find(|r| r.account_number == account_number)
                        .map(|r| r.line)
                        .unwrap_or_default(),
                },
                other => ReconcileError::Persistence(other),
            })
    }

    async fn finish(
        &self,
        name: &str,
        transactions: Vec<Transaction>,
    ) -> Result<ProcessReport, ReconcileError> {
        // The file record became Processed in the same commit as the batch
        let mut balances = BTreeMap::new();
        for txn in &transactions {
            if balances.contains_key(&txn.account_number) {
                continue;
            }
            match self.ledger.balance(txn.account_number).await {
                Ok(balance) => {
                    balances.insert(txn.account_number, balance);
                }
                Err(err) => warn!(
                    file = name,
                    account = txn.account_number,
                    error = %err,
                    "could not read balance for report"
                ),
            }
        }

        self.transition(name, RunStage::Done);
        info!(
            file = name,
            transactions = transactions.len(),
            accounts = balances.len(),
            "ledger file processed"
        );

        Ok(ProcessReport {
            file: name.to_string(),
            transactions,
            balances,
        })
    }

    /// Record or release after a failed run
    async fn settle_failure(&self, name: &str, err: &ReconcileError) {
        let settled = if err.is_recorded() {
            warn!(file = name, error = %err, "ledger file failed");
            self.registry.mark_failed(name, &err.to_string()).await
        } else {
            warn!(file = name, error = %err, "ledger file not processed, leaving record unchanged");
            self.registry.release(name).await
        };

        if let Err(registry_err) = settled {
            error!(
                file = name,
                error = %err,
                registry_error = %registry_err,
                "could not update file record after failed run"
            );
        }
    }

    fn transition(&self, name: &str, stage: RunStage) {
        debug!(file = name, %stage, "reconciliation stage");
    }
}
