//! End-to-end runs against the SQLite store and a directory-backed object store

mod common;

use bigdecimal::BigDecimal;
use common::{ledger_file, SqliteHarness};
use ledger_ingest::{AccountLedger, FileRegistry, FileState, ReconcileError};
use std::str::FromStr;

fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

#[tokio::test]
async fn test_sqlite_balance_conservation() {
    let h = SqliteHarness::new();
    h.db.open_account(1001, "Ana", "ana@example.com").await.unwrap();
    h.db.open_account(2002, "Ben", "ben@example.com").await.unwrap();

    h.engine
        .upload(
            "jan.csv",
            ledger_file(&[
                "1,1001,2024-01-02,100",
                "2,1001,2024-01-03,-30",
                "3,2002,2024-01-04,50",
            ]),
        )
        .await
        .unwrap();
    assert!(h
        .objects
        .path()
        .join("ledger-bucket")
        .join("files")
        .join("jan.csv")
        .exists());

    let report = h.engine.process("jan.csv").await.unwrap();
    assert_eq!(report.transactions.len(), 3);

    assert_eq!(h.db.balance(1001).await.unwrap(), dec("70"));
    assert_eq!(h.db.balance(2002).await.unwrap(), dec("50"));
    let stored = h.db.transactions(None).await.unwrap();
    let ids = |txns: &[ledger_ingest::Transaction]| txns.iter().map(|t| t.id).collect::<Vec<_>>();
    assert_eq!(ids(&stored), ids(&report.transactions));
    assert_eq!(stored[1].amount, dec("-30"));

    let record = h.db.lookup("jan.csv").await.unwrap().unwrap();
    assert_eq!(record.state(), FileState::Processed);
    assert_eq!(h.staged_entries(), 0);

    assert!(matches!(
        h.engine.process("jan.csv").await,
        Err(ReconcileError::AlreadyProcessed(_))
    ));
    assert_eq!(h.db.transactions(None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_sqlite_missing_account_rolls_back() {
    let h = SqliteHarness::new();
    h.db.open_account(1001, "Ana", "ana@example.com").await.unwrap();
    h.engine
        .upload(
            "feb.csv",
            ledger_file(&[
                "1,1001,2024-02-01,100",
                "2,1001,2024-02-02,25",
                "3,9009,2024-02-03,10",
            ]),
        )
        .await
        .unwrap();

    let err = h.engine.process("feb.csv").await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::AccountNotFound {
            account_number: 9009,
            ..
        }
    ));

    let record = h.db.lookup("feb.csv").await.unwrap().unwrap();
    assert_eq!(record.state(), FileState::Failed);
    assert!(record.output.unwrap().contains("9009"));
    assert!(h.db.transactions(None).await.unwrap().is_empty());
    assert_eq!(h.db.balance(1001).await.unwrap(), dec("0"));
    assert_eq!(h.staged_entries(), 0);
}

#[tokio::test]
async fn test_sqlite_unknown_object_is_retry_safe() {
    let h = SqliteHarness::new();
    h.db.open_account(1001, "Ana", "ana@example.com").await.unwrap();
    h.db.register("late.csv", "object-store").await.unwrap();

    assert!(matches!(
        h.engine.process("late.csv").await,
        Err(ReconcileError::Storage { .. })
    ));
    let record = h.db.lookup("late.csv").await.unwrap().unwrap();
    assert_eq!(record.state(), FileState::Unprocessed);

    h.engine
        .upload("late.csv", ledger_file(&["1,1001,2024-03-01,12.5"]))
        .await
        .unwrap();
    h.engine.process("late.csv").await.unwrap();
    assert_eq!(h.db.balance(1001).await.unwrap(), dec("12.5"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_concurrent_runs_same_account() {
    let h = SqliteHarness::new();
    h.db.open_account(1001, "Ana", "ana@example.com").await.unwrap();

    for i in 0..8 {
        h.engine
            .upload(
                &format!("part-{}.csv", i),
                ledger_file(&["1,1001,2024-04-01,2.50", "2,1001,2024-04-02,0.25"]),
            )
            .await
            .unwrap();
    }

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.process(&format!("part-{}.csv", i)).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.db.balance(1001).await.unwrap(), dec("22"));
    assert_eq!(h.db.transactions(Some(1001)).await.unwrap().len(), 16);
    let files = h.engine.list_files(0, None).await.unwrap();
    assert_eq!(files.len(), 8);
    assert!(files.iter().all(|f| f.state() == FileState::Processed));
}

#[tokio::test]
async fn test_sqlite_out_of_range_account_is_not_found() {
    let h = SqliteHarness::new();
    h.db.open_account(1001, "Ana", "ana@example.com").await.unwrap();
    h.engine
        .upload(
            "huge.csv",
            ledger_file(&["1,1001,2024-01-01,1", "2,18446744073709551615,2024-01-01,1"]),
        )
        .await
        .unwrap();

    let err = h.engine.process("huge.csv").await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::AccountNotFound {
            account_number: u64::MAX,
            line: 3
        }
    ));
    assert_eq!(err.status_code(), 422);

    let record = h.db.lookup("huge.csv").await.unwrap().unwrap();
    assert_eq!(record.state(), FileState::Failed);
    assert!(record.output.unwrap().contains("18446744073709551615"));
    assert_eq!(h.db.balance(1001).await.unwrap(), dec("0"));
}

#[tokio::test]
async fn test_sqlite_committed_file_is_never_left_claimed() {
    let h = SqliteHarness::new();
    h.db.open_account(1001, "Ana", "ana@example.com").await.unwrap();
    h.engine
        .upload("once.csv", ledger_file(&["1,1001,2024-02-01,4"]))
        .await
        .unwrap();

    h.engine.process("once.csv").await.unwrap();
    let record = h.db.lookup("once.csv").await.unwrap().unwrap();
    assert!(record.processed);
    assert!(!record.processing);
    assert!(record.output.is_none());

    // Replaying the batch for the same file is refused inside the store
    let replay = ledger_ingest::ledger::parse(&ledger_file(&["1,1001,2024-02-01,4"])).unwrap();
    assert!(h.db.commit_batch("once.csv", &replay).await.is_err());
    assert_eq!(h.db.balance(1001).await.unwrap(), dec("4"));
}
