use tracing::{debug, info, instrument, warn};

use crate::{
    account::ClientId,
    command::{OperationKind, PaymentCommand},
    journal::{EntryId, LedgerEntry, NewLedgerEntry, OperationKey},
    store::{LedgerStore, LedgerTransaction},
};

use super::{
    Ledger, LedgerError, RequestContext,
    idempotency::{RecordedOutcome, Resolution},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub client_id: ClientId,
    pub amount: i64,
    /// Balance right after the payment committed.
    pub balance: i64,
    pub entry_id: EntryId,
    /// The receipt was reproduced from an earlier commit under the same key.
    pub replayed: bool,
}

impl RecordedOutcome for PaymentReceipt {
    fn from_entries(key: &OperationKey, entries: &[LedgerEntry]) -> Result<Self, LedgerError> {
        match entries {
            [entry] => Ok(Self {
                client_id: entry.client_id.clone(),
                amount: entry.amount,
                balance: entry.balance_after,
                entry_id: entry.entry_id,
                replayed: true,
            }),
            _ => Err(LedgerError::Integrity(format!(
                "payment key {key} maps to {} entries",
                entries.len()
            ))),
        }
    }
}

impl<S: LedgerStore> Ledger<S> {
    /// Applies a signed amount to one account: credit when positive, debit
    /// (checked against the balance floor) when negative.
    #[instrument(
        skip_all,
        fields(
            request_id = %ctx.request_id(),
            client_id = %command.client_id(),
            amount = command.amount(),
        )
    )]
    pub async fn create_payment(
        &self,
        ctx: &RequestContext,
        command: PaymentCommand,
    ) -> Result<PaymentReceipt, LedgerError> {
        let kind = OperationKind::Payment;
        self.config
            .idempotency
            .check(kind, command.idempotency_key())?;
        let key = command
            .idempotency_key()
            .cloned()
            .map(|key| OperationKey::new(kind, key));

        let mut tx = self.store.begin().await?;

        if let Some(key) = &key {
            if let Resolution::Replay(receipt) =
                self.resolve::<PaymentReceipt>(ctx, &mut tx, key).await?
            {
                if receipt.client_id != *command.client_id() || receipt.amount != command.amount()
                {
                    warn!(
                        %key,
                        recorded_client = %receipt.client_id,
                        recorded_amount = receipt.amount,
                        "idempotency key reused with different parameters"
                    );
                }
                debug!(%key, balance = receipt.balance, "payment replayed");
                return Ok(receipt);
            }
        }

        let account = self.lock_account(ctx, &mut tx, command.client_id()).await?;
        let balance = account.apply_delta(command.amount(), self.config.min_balance)?;

        tx.set_balance(command.client_id(), balance)?;
        let entry_id = tx.append(NewLedgerEntry {
            client_id: command.client_id().clone(),
            amount: command.amount(),
            balance_after: balance,
            operation_key: key,
        })?;
        tx.commit().await?;

        info!(%entry_id, balance, "payment committed");
        Ok(PaymentReceipt {
            client_id: command.client_id().clone(),
            amount: command.amount(),
            balance,
            entry_id,
            replayed: false,
        })
    }
}
