use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Currency code must be three ASCII letters, got `{0}`")]
pub struct InvalidCurrency(pub String);

/// ISO 4217 alphabetic code, stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, InvalidCurrency> {
        let code = code.trim();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code.to_ascii_uppercase()))
        } else {
            Err(InvalidCurrency(code.to_string()))
        }
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// Number of decimal places between the minor and the major unit.
    pub fn exponent(&self) -> u32 {
        match self.0.as_str() {
            "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF"
            | "UGX" | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
            "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
            _ => 2,
        }
    }

    /// Renders an amount held in minor units as a major-unit decimal.
    pub fn to_major(&self, minor: i64) -> Decimal {
        Decimal::new(minor, self.exponent())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = InvalidCurrency;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn normalizes_code() {
        let usd = Currency::new(" usd ").unwrap();
        assert_eq!(usd.code(), "USD");
        assert_eq!(usd.to_string(), "USD");
    }

    #[test]
    fn rejects_malformed_codes() {
        assert!(Currency::new("").is_err());
        assert!(Currency::new("US").is_err());
        assert!(Currency::new("US1").is_err());
        assert!(Currency::new("EURO").is_err());
    }

    #[test]
    fn renders_major_units() {
        let jpy = Currency::new("JPY").unwrap();
        assert_eq!(jpy.to_major(11400), Decimal::from(11400));

        let usd = Currency::new("USD").unwrap();
        assert_eq!(usd.to_major(-1050), Decimal::from_str("-10.50").unwrap());

        let kwd = Currency::new("KWD").unwrap();
        assert_eq!(kwd.to_major(1), Decimal::from_str("0.001").unwrap());
    }
}
