//! Upload and reconcile a ledger file against a SQLite database
//!
//! ```text
//! RUST_LOG=ledger_ingest=debug cargo run --example ingest_file
//! ```

use ledger_ingest::{
    AccountLedger, FsObjectStore, PipelineConfig, ReconcileError, ReconciliationEngine,
    SqliteStore,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let workspace = tempfile::tempdir()?;
    let db = SqliteStore::open(workspace.path().join("ledger.db"))?;
    db.open_account(1001, "Ana Silva", "ana@example.com").await?;
    db.open_account(2002, "Ben Okafor", "ben@example.com").await?;

    let config = PipelineConfig::from_env().with_staging_dir(workspace.path().join("staging"));
    let engine = ReconciliationEngine::new(
        Arc::new(db.clone()),
        Arc::new(db.clone()),
        Arc::new(FsObjectStore::new(workspace.path().join("objects"))),
        config,
    );

    let file = "Id,Account,Date,Amount\n\
                1,1001,2024-01-02,100.00\n\
                2,1001,2024-01-03,-30.00\n\
                3,2002,2024-01-04,50.00\n";
    engine.upload("january.csv", file.as_bytes().to_vec()).await?;

    let report = engine.process("january.csv").await?;
    println!("Processed {} transactions", report.transactions.len());
    for (account, balance) in &report.balances {
        println!("  account {}: {}", account, balance);
    }

    match engine.process("january.csv").await {
        Err(err @ ReconcileError::AlreadyProcessed(_)) => {
            println!("Second run rejected ({}): {}", err.status_code(), err)
        }
        other => println!("Unexpected second run outcome: {:?}", other.map(|r| r.file)),
    }

    let missing = "Id,Account,Date,Amount\n1,1001,2024-02-01,10\n2,9009,2024-02-02,5\n";
    engine.upload("february.csv", missing.as_bytes().to_vec()).await?;
    if let Err(err) = engine.process("february.csv").await {
        println!("february.csv failed: {}", err);
    }
    println!("Account 1001 balance: {}", db.balance(1001).await?);

    Ok(())
}
