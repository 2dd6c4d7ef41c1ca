//! Batch runner over [`crate::engine`]: opens accounts from one CSV, replays
//! operations from another and prints the reconciled balances.

use std::io::{Read, Write};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    account::{Account, ClientId},
    command::{OperationKind, PaymentCommand, TransferCommand},
    config::LedgerConfig,
    currency::Currency,
    engine::{Ledger, LedgerError},
    store::in_memory_store::InMemoryLedgerStore,
};
use csv_parser::{AccountRecord, CsvRecordParser, OperationRecord};
use csv_printer::{AccountRow, print_accounts};
pub mod csv_parser;
pub mod csv_printer;

/// Installs a stderr `fmt` subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Why a single operation row was skipped.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Malformed operation: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub struct Service<'w, A, R, W: 'w> {
    pub accounts: A,
    pub operations: R,
    pub output: &'w mut W,
    pub config: LedgerConfig,
    pub error_printer: Box<dyn FnMut(u64, BatchError)>,
}

impl<'w, A, R, W> Service<'w, A, R, W>
where
    A: Read,
    R: Read,
    W: Write + 'w,
{
    pub async fn run(mut self) -> Result<()> {
        let store = InMemoryLedgerStore::new();
        let accounts = CsvRecordParser::<_, AccountRecord>::new(self.accounts)
            .context("Failed to read accounts header")?;
        for (line, row) in accounts {
            let row = row.with_context(|| format!("Malformed account at line {line}"))?;
            let account = Account::open(
                ClientId::new(&row.client)
                    .with_context(|| format!("Invalid account at line {line}"))?,
                Currency::new(&row.currency)
                    .with_context(|| format!("Invalid account at line {line}"))?,
                row.balance,
            );
            store
                .open_account(account)
                .with_context(|| format!("Cannot open account at line {line}"))?;
        }

        let ledger = Ledger::new(store, self.config);
        let mut applied = 0usize;
        let operations = CsvRecordParser::<_, OperationRecord>::new(self.operations)
            .context("Failed to read operations header")?;
        for (line, row) in operations {
            let outcome = match row {
                Ok(row) => apply(&ledger, row).await.map_err(BatchError::from),
                Err(err) => Err(BatchError::from(err)),
            };
            match outcome {
                Ok(()) => applied += 1,
                Err(err) => (self.error_printer)(line, err),
            }
        }
        info!(applied, "operations replayed");

        let mut rows = Vec::new();
        for client_id in ledger.store().client_ids()? {
            let reconciliation = ledger
                .reconcile(&client_id)
                .await
                .with_context(|| format!("Reconciliation failed for {client_id}"))?;
            let balance = ledger.balance(&client_id).await?;
            rows.push(AccountRow {
                client: client_id.to_string(),
                currency: balance.currency.to_string(),
                balance: reconciliation.balance,
                major: balance.currency.to_major(reconciliation.balance),
            });
        }
        print_accounts(self.output, rows.into_iter())
    }
}

async fn apply(
    ledger: &Ledger<InMemoryLedgerStore>,
    row: OperationRecord,
) -> Result<(), LedgerError> {
    let ctx = ledger.request_context();
    match row.kind {
        OperationKind::Payment => {
            let command = PaymentCommand::parse(&row.client, row.amount, row.key.as_deref())?;
            ledger.create_payment(&ctx, command).await?;
        }
        OperationKind::Transfer => {
            let command = TransferCommand::parse(
                &row.client,
                row.to.as_deref().unwrap_or_default(),
                row.amount,
                row.key.as_deref(),
            )?;
            ledger.transfer(&ctx, command).await?;
        }
    }
    Ok(())
}
