use std::time::Duration;

use thiserror::Error;

use crate::command::{CommandError, IdempotencyKey, OperationKind};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: `{value}`")]
    InvalidValue { name: &'static str, value: String },
}

/// Whether mutating operations must carry an idempotency key.
///
/// Applies to payments and transfers alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdempotencyPolicy {
    /// A missing key opts the request out of deduplication.
    #[default]
    Optional,
    Required,
}

impl IdempotencyPolicy {
    pub fn check(
        self,
        kind: OperationKind,
        key: Option<&IdempotencyKey>,
    ) -> Result<(), CommandError> {
        match (self, key) {
            (IdempotencyPolicy::Required, None) => {
                Err(CommandError::MissingIdempotencyKey { kind })
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Default bound on lock waits for a request.
    pub lock_timeout: Duration,
    /// Lowest balance a debit may leave behind.
    pub min_balance: i64,
    pub idempotency: IdempotencyPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            min_balance: 0,
            idempotency: IdempotencyPolicy::Optional,
        }
    }
}

const LOCK_TIMEOUT_MS: &str = "LEDGER_LOCK_TIMEOUT_MS";
const MIN_BALANCE: &str = "LEDGER_MIN_BALANCE";
const IDEMPOTENCY: &str = "LEDGER_IDEMPOTENCY";

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from `lookup`, falling back to defaults for unset names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(LOCK_TIMEOUT_MS) {
            let millis = value
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid(LOCK_TIMEOUT_MS, &value))?;
            config.lock_timeout = Duration::from_millis(millis);
        }
        if let Some(value) = lookup(MIN_BALANCE) {
            config.min_balance = value
                .trim()
                .parse()
                .map_err(|_| invalid(MIN_BALANCE, &value))?;
        }
        if let Some(value) = lookup(IDEMPOTENCY) {
            config.idempotency = match value.trim().to_ascii_lowercase().as_str() {
                "optional" => IdempotencyPolicy::Optional,
                "required" => IdempotencyPolicy::Required,
                _ => return Err(invalid(IDEMPOTENCY, &value)),
            };
        }

        Ok(config)
    }
}

fn invalid(name: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    }
}
