use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use crate::account::{ClientId, EmptyClientId};

/// Ledger operations that mutate balances. Each kind has its own idempotency key space.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Payment,
    Transfer,
}

/// Caller-supplied token identifying one logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Blank keys mean the caller opted out of deduplication.
    pub fn new(key: &str) -> Option<Self> {
        let key = key.trim();
        (!key.is_empty()).then(|| Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    ClientId(#[from] EmptyClientId),
    #[error("Amount must not be zero for {kind:?}")]
    ZeroAmount { kind: OperationKind },
    #[error("Amount must be positive for {kind:?}")]
    NonPositiveAmount { kind: OperationKind },
    #[error("Idempotency key is required for {kind:?}")]
    MissingIdempotencyKey { kind: OperationKind },
    #[error("Transfer source and destination must differ, got {client_id} on both sides")]
    SameAccountTransfer { client_id: ClientId },
}

/// Signed credit (or debit, when negative) to a single account.
#[derive(Debug, Clone)]
pub struct PaymentCommand {
    client_id: ClientId,
    amount: i64,
    idempotency_key: Option<IdempotencyKey>,
}

impl PaymentCommand {
    pub fn new(
        client_id: ClientId,
        amount: i64,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<Self, CommandError> {
        if amount == 0 {
            return Err(CommandError::ZeroAmount {
                kind: OperationKind::Payment,
            });
        }
        Ok(Self {
            client_id,
            amount,
            idempotency_key,
        })
    }

    /// Builds a command from raw request fields.
    pub fn parse(
        client_id: &str,
        amount: i64,
        idempotency_key: Option<&str>,
    ) -> Result<Self, CommandError> {
        Self::new(
            ClientId::new(client_id)?,
            amount,
            idempotency_key.and_then(IdempotencyKey::new),
        )
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn idempotency_key(&self) -> Option<&IdempotencyKey> {
        self.idempotency_key.as_ref()
    }
}

/// Atomic move of a positive amount from one account to another.
#[derive(Debug, Clone)]
pub struct TransferCommand {
    from: ClientId,
    to: ClientId,
    amount: i64,
    idempotency_key: Option<IdempotencyKey>,
}

impl TransferCommand {
    pub fn new(
        from: ClientId,
        to: ClientId,
        amount: i64,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<Self, CommandError> {
        if amount <= 0 {
            return Err(CommandError::NonPositiveAmount {
                kind: OperationKind::Transfer,
            });
        }
        if from == to {
            return Err(CommandError::SameAccountTransfer { client_id: from });
        }
        Ok(Self {
            from,
            to,
            amount,
            idempotency_key,
        })
    }

    pub fn parse(
        from: &str,
        to: &str,
        amount: i64,
        idempotency_key: Option<&str>,
    ) -> Result<Self, CommandError> {
        Self::new(
            ClientId::new(from)?,
            ClientId::new(to)?,
            amount,
            idempotency_key.and_then(IdempotencyKey::new),
        )
    }

    pub fn from(&self) -> &ClientId {
        &self.from
    }

    pub fn to(&self) -> &ClientId {
        &self.to
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn idempotency_key(&self) -> Option<&IdempotencyKey> {
        self.idempotency_key.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_key_opts_out() {
        assert!(IdempotencyKey::new("").is_none());
        assert!(IdempotencyKey::new("  ").is_none());
        assert_eq!(IdempotencyKey::new(" k1 ").unwrap().as_str(), "k1");

        let cmd = PaymentCommand::parse("A", 100, Some("")).unwrap();
        assert!(cmd.idempotency_key().is_none());
    }

    #[test]
    fn payment_validation() {
        let cmd = PaymentCommand::parse("A", -30, Some("k1")).unwrap();
        assert_eq!(cmd.client_id().as_str(), "A");
        assert_eq!(cmd.amount(), -30);
        assert_eq!(cmd.idempotency_key().unwrap().as_str(), "k1");

        let err = PaymentCommand::parse("A", 0, None).unwrap_err();
        assert!(matches!(
            err,
            CommandError::ZeroAmount {
                kind: OperationKind::Payment
            }
        ));

        let err = PaymentCommand::parse(" ", 10, None).unwrap_err();
        assert!(matches!(err, CommandError::ClientId(_)));
    }

    #[test]
    fn transfer_validation() {
        let cmd = TransferCommand::parse("A", "B", 300, Some("k2")).unwrap();
        assert_eq!(cmd.from().as_str(), "A");
        assert_eq!(cmd.to().as_str(), "B");

        for amount in [0, -1] {
            let err = TransferCommand::parse("A", "B", amount, None).unwrap_err();
            assert!(matches!(
                err,
                CommandError::NonPositiveAmount {
                    kind: OperationKind::Transfer
                }
            ));
        }

        let err = TransferCommand::parse("A", " A", 10, None).unwrap_err();
        assert!(matches!(err, CommandError::SameAccountTransfer { .. }));
        assert_eq!(
            err.to_string(),
            "Transfer source and destination must differ, got A on both sides"
        );
    }
}
