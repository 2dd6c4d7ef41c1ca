use tracing::{debug, info, instrument, warn};

use crate::{
    account::ClientId,
    command::{OperationKind, TransferCommand},
    journal::{LedgerEntry, NewLedgerEntry, OperationKey},
    store::{LedgerStore, LedgerTransaction},
};

use super::{
    Ledger, LedgerError, RequestContext,
    idempotency::{RecordedOutcome, Resolution},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub from: ClientId,
    pub to: ClientId,
    pub amount: i64,
    /// Source balance right after the transfer committed.
    pub from_balance: i64,
    /// Destination balance right after the transfer committed.
    pub to_balance: i64,
    pub replayed: bool,
}

impl RecordedOutcome for TransferReceipt {
    fn from_entries(key: &OperationKey, entries: &[LedgerEntry]) -> Result<Self, LedgerError> {
        let [a, b] = entries else {
            return Err(LedgerError::Integrity(format!(
                "transfer key {key} maps to {} entries",
                entries.len()
            )));
        };
        let (debit, credit) = if a.amount < 0 { (a, b) } else { (b, a) };
        if debit.amount >= 0 || credit.amount.checked_neg() != Some(debit.amount) {
            return Err(LedgerError::Integrity(format!(
                "transfer key {key} entries do not balance: {} and {}",
                a.amount, b.amount
            )));
        }
        Ok(Self {
            from: debit.client_id.clone(),
            to: credit.client_id.clone(),
            amount: credit.amount,
            from_balance: debit.balance_after,
            to_balance: credit.balance_after,
            replayed: true,
        })
    }
}

/// Order in which a transfer locks its two accounts. Depends only on the ids,
/// so opposite-direction transfers between one pair cannot deadlock.
pub fn lock_order<'a>(a: &'a ClientId, b: &'a ClientId) -> (&'a ClientId, &'a ClientId) {
    if a <= b { (a, b) } else { (b, a) }
}

impl<S: LedgerStore> Ledger<S> {
    /// Moves `amount` from one account to another; both sides commit together or not at all.
    #[instrument(
        skip_all,
        fields(
            request_id = %ctx.request_id(),
            from = %command.from(),
            to = %command.to(),
            amount = command.amount(),
        )
    )]
    pub async fn transfer(
        &self,
        ctx: &RequestContext,
        command: TransferCommand,
    ) -> Result<TransferReceipt, LedgerError> {
        let kind = OperationKind::Transfer;
        self.config
            .idempotency
            .check(kind, command.idempotency_key())?;
        let key = command
            .idempotency_key()
            .cloned()
            .map(|key| OperationKey::new(kind, key));

        let mut tx = self.store.begin().await?;

        // Anchored on the key alone: the transfer spans two accounts.
        if let Some(key) = &key {
            if let Resolution::Replay(receipt) =
                self.resolve::<TransferReceipt>(ctx, &mut tx, key).await?
            {
                if receipt.from != *command.from()
                    || receipt.to != *command.to()
                    || receipt.amount != command.amount()
                {
                    warn!(
                        %key,
                        recorded_from = %receipt.from,
                        recorded_to = %receipt.to,
                        recorded_amount = receipt.amount,
                        "idempotency key reused with different parameters"
                    );
                }
                debug!(%key, "transfer replayed");
                return Ok(receipt);
            }
        }

        let (first, second) = lock_order(command.from(), command.to());
        let first_account = self.lock_account(ctx, &mut tx, first).await?;
        let second_account = self.lock_account(ctx, &mut tx, second).await?;
        let (source, destination) = if first == command.from() {
            (first_account, second_account)
        } else {
            (second_account, first_account)
        };

        if source.currency() != destination.currency() {
            return Err(LedgerError::CurrencyMismatch {
                from_client: command.from().clone(),
                from_currency: source.currency().clone(),
                to_client: command.to().clone(),
                to_currency: destination.currency().clone(),
            });
        }

        let amount = command.amount();
        let from_balance = source.apply_delta(-amount, self.config.min_balance)?;
        let to_balance = destination.apply_delta(amount, self.config.min_balance)?;

        tx.set_balance(command.from(), from_balance)?;
        tx.set_balance(command.to(), to_balance)?;
        tx.append(NewLedgerEntry {
            client_id: command.from().clone(),
            amount: -amount,
            balance_after: from_balance,
            operation_key: key.clone(),
        })?;
        tx.append(NewLedgerEntry {
            client_id: command.to().clone(),
            amount,
            balance_after: to_balance,
            operation_key: key,
        })?;
        tx.commit().await?;

        info!(from_balance, to_balance, "transfer committed");
        Ok(TransferReceipt {
            from: command.from().clone(),
            to: command.to().clone(),
            amount,
            from_balance,
            to_balance,
            replayed: false,
        })
    }
}
