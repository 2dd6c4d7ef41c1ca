use std::fs::File;

use anyhow::{Context, Result};
use payment_ledger::{
    ErrorKind, LedgerConfig,
    bin_utils::{BatchError, Service, init_tracing},
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let accounts = args
        .next()
        .context("Expected an accounts file as the first argument")?;
    let operations = args
        .next()
        .context("Expected an operations file as the second argument")?;
    let config = LedgerConfig::from_env().context("Invalid ledger configuration")?;

    let service = Service {
        accounts: File::open(&accounts).with_context(|| format!("Failed to open `{accounts}`"))?,
        operations: File::open(&operations)
            .with_context(|| format!("Failed to open `{operations}`"))?,
        output: &mut std::io::stdout(),
        config,
        error_printer: Box::new(|line, err| match &err {
            BatchError::Ledger(inner) if inner.kind() == ErrorKind::Integrity => {
                eprintln!("Integrity failure at line {line}: {err}")
            }
            _ => eprintln!("Error at line {line}: {err}"),
        }),
    };
    service.run().await
}
