use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use crate::currency::Currency;

#[derive(Debug, Error)]
#[error("Client identifier must not be empty")]
pub struct EmptyClientId;

/// Unique identifier of a client account. Ordering is the lock order used by transfers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: &str) -> Result<Self, EmptyClientId> {
        let id = id.trim();
        if id.is_empty() {
            Err(EmptyClientId)
        } else {
            Ok(Self(id.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ClientId {
    type Error = EmptyClientId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error(
        "Insufficient balance for {client_id}: applying {amount} to {balance} would go below {floor}"
    )]
    InsufficientBalance {
        client_id: ClientId,
        balance: i64,
        amount: i64,
        floor: i64,
    },
    #[error("Balance overflow for {client_id}: cannot apply {amount} to {balance}")]
    BalanceOverflow {
        client_id: ClientId,
        balance: i64,
        amount: i64,
    },
}

/// Current state of a client account, in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    client_id: ClientId,
    currency: Currency,
    balance: i64,
    opening_balance: i64,
}

impl Account {
    /// Provisions an account. The opening balance anchors reconciliation.
    pub fn open(client_id: ClientId, currency: Currency, balance: i64) -> Self {
        Self {
            client_id,
            currency,
            balance,
            opening_balance: balance,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn opening_balance(&self) -> i64 {
        self.opening_balance
    }

    /// Computes the balance that results from applying `amount`.
    ///
    /// Debits must not take the balance below `floor`; credits are only
    /// checked for overflow.
    pub fn apply_delta(&self, amount: i64, floor: i64) -> Result<i64, AccountError> {
        let new_balance =
            self.balance
                .checked_add(amount)
                .ok_or_else(|| AccountError::BalanceOverflow {
                    client_id: self.client_id.clone(),
                    balance: self.balance,
                    amount,
                })?;
        if amount < 0 && new_balance < floor {
            return Err(AccountError::InsufficientBalance {
                client_id: self.client_id.clone(),
                balance: self.balance,
                amount,
                floor,
            });
        }
        Ok(new_balance)
    }

    pub(crate) fn set_balance(&mut self, balance: i64) {
        self.balance = balance;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(balance: i64) -> Account {
        Account::open(
            ClientId::new("A").unwrap(),
            Currency::new("JPY").unwrap(),
            balance,
        )
    }

    #[test]
    fn client_id_is_trimmed_and_non_empty() {
        assert_eq!(ClientId::new("  A ").unwrap().as_str(), "A");
        assert!(ClientId::new("   ").is_err());
        assert!(ClientId::new("").is_err());
    }

    #[test]
    fn credit_and_debit() {
        let acc = account(10000);
        assert_eq!(acc.apply_delta(1400, 0).unwrap(), 11400);
        assert_eq!(acc.apply_delta(-10000, 0).unwrap(), 0);
        // delta is only computed, never applied
        assert_eq!(acc.balance(), 10000);
    }

    #[test]
    fn debit_below_floor() {
        let acc = account(100);
        let err = acc.apply_delta(-101, 0).unwrap_err();
        assert!(matches!(
            err,
            AccountError::InsufficientBalance {
                balance: 100,
                amount: -101,
                floor: 0,
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "Insufficient balance for A: applying -101 to 100 would go below 0"
        );

        // a negative floor allows an overdraft up to it
        assert_eq!(acc.apply_delta(-150, -50).unwrap(), -50);
    }

    #[test]
    fn credit_ignores_floor() {
        let mut acc = account(0);
        acc.set_balance(-500);
        assert_eq!(acc.apply_delta(100, 0).unwrap(), -400);
    }

    #[test]
    fn overflow_is_rejected() {
        let acc = account(i64::MAX);
        let err = acc.apply_delta(1, 0).unwrap_err();
        assert!(matches!(err, AccountError::BalanceOverflow { .. }));
    }

    #[test]
    fn opening_balance_survives_updates() {
        let mut acc = account(10000);
        acc.set_balance(11400);
        assert_eq!(acc.balance(), 11400);
        assert_eq!(acc.opening_balance(), 10000);
    }
}
