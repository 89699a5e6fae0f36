//! Integration test helpers for ledger-ingest.
//!
//! Builds engines over in-memory and SQLite backends and generates ledger
//! files for import testing.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;

use ledger_ingest::{
    FsObjectStore, MemoryObjectStore, MemoryStorage, PipelineConfig, ReconciliationEngine,
    SqliteStore,
};

static INIT: Once = Once::new();

pub const HEADER: &str = "Id,Account,Date,Amount";

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

/// Build a ledger file from data lines, prefixed with the standard header.
pub fn ledger_file(lines: &[&str]) -> Vec<u8> {
    let mut text = String::from(HEADER);
    text.push('\n');
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    text.into_bytes()
}

/// Number of entries left in a staging directory.
pub fn staged_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.count())
        .unwrap_or(0)
}

/// Engine over in-memory collaborators.
pub struct MemoryHarness {
    pub storage: MemoryStorage,
    pub store: MemoryObjectStore,
    pub staging: TempDir,
    pub engine: ReconciliationEngine,
}

impl MemoryHarness {
    pub fn new() -> Self {
        Self::with_store(MemoryObjectStore::new())
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self::with_store(MemoryObjectStore::new().with_latency(latency))
    }

    fn with_store(store: MemoryObjectStore) -> Self {
        init_test_logging();
        let storage = MemoryStorage::new();
        let staging = tempfile::tempdir().expect("staging dir");
        let engine = ReconciliationEngine::new(
            Arc::new(storage.clone()),
            Arc::new(storage.clone()),
            Arc::new(store.clone()),
            PipelineConfig::default().with_staging_dir(staging.path().join("staging")),
        );
        Self {
            storage,
            store,
            staging,
            engine,
        }
    }

    pub fn staged_entries(&self) -> usize {
        staged_entries(&self.engine.config().staging_dir)
    }
}

/// Engine over SQLite and a directory-backed object store.
pub struct SqliteHarness {
    pub db: SqliteStore,
    pub objects: TempDir,
    pub staging: TempDir,
    pub engine: ReconciliationEngine,
}

impl SqliteHarness {
    pub fn new() -> Self {
        init_test_logging();
        let db = SqliteStore::open_in_memory().expect("sqlite store");
        let objects = tempfile::tempdir().expect("object dir");
        let staging = tempfile::tempdir().expect("staging dir");
        let engine = ReconciliationEngine::new(
            Arc::new(db.clone()),
            Arc::new(db.clone()),
            Arc::new(FsObjectStore::new(objects.path())),
            PipelineConfig::default().with_staging_dir(staging.path()),
        );
        Self {
            db,
            objects,
            staging,
            engine,
        }
    }

    pub fn staged_entries(&self) -> usize {
        staged_entries(self.staging.path())
    }
}
