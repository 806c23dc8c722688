//! Value types passed between the cycle stages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// UI-denominated quantity (SOL, reward tokens, gating tokens).
pub type Amount = f64;

/// Identifier returned by the chain gateway for a submitted operation.
pub type TransferId = String;

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Base58 account identifier (wallet, mint or program).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Strict constructor used for configuration input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if !(32..=44).contains(&trimmed.len()) {
            return None;
        }
        if !trimmed.bytes().all(|b| BASE58_ALPHABET.contains(&b)) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `abcd...wxyz` form used in activity messages.
    pub fn short(&self) -> String {
        let count = self.0.chars().count();
        if count <= 8 {
            return self.0.clone();
        }
        let head: String = self.0.chars().take(4).collect();
        let tail: String = self.0.chars().skip(count - 4).collect();
        format!("{head}...{tail}")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Balance of a holder as observed at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holder {
    pub address: Address,
    pub balance: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub address: Address,
    pub amount: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleResult {
    pub distributed: Amount,
    pub recipients: usize,
    pub skipped_dumpers: usize,
    pub transfer_ids: Vec<TransferId>,
    pub errors: Vec<String>,
}

impl CycleResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Floors a UI amount into smallest units. Non-finite and negative inputs map to zero.
pub fn to_base_units(amount: Amount, decimals: u8) -> u64 {
    if !amount.is_finite() || amount <= 0.0 {
        return 0;
    }
    let scaled = (amount * 10f64.powi(i32::from(decimals))).floor();
    if scaled >= u64::MAX as f64 {
        u64::MAX
    } else {
        scaled as u64
    }
}

pub fn from_base_units(units: u64, decimals: u8) -> Amount {
    units as f64 / 10f64.powi(i32::from(decimals))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_rejects_non_base58() {
        assert!(Address::parse("So11111111111111111111111111111111111111112").is_some());
        assert!(Address::parse("0OIl0OIl0OIl0OIl0OIl0OIl0OIl0OIl").is_none());
        assert!(Address::parse("short").is_none());
    }

    #[test]
    fn test_address_short_form() {
        let addr = Address::new("ABCDEFGHJKLMNPQRSTUVWXYZ12345678");
        assert_eq!(addr.short(), "ABCD...5678");
    }

    #[test]
    fn test_address_short_form_cuts_on_char_boundaries() {
        assert_eq!(Address::new("aéééééééé").short(), "aééé...éééé");
        assert_eq!(Address::new("ééé").short(), "ééé");
    }

    #[test]
    fn test_base_unit_conversion_floors() {
        assert_eq!(to_base_units(2.5, 9), 2_500_000_000);
        assert_eq!(to_base_units(0.0000009, 6), 0);
        assert_eq!(to_base_units(-3.0, 6), 0);
        assert_eq!(to_base_units(f64::NAN, 6), 0);
        assert_eq!(from_base_units(2_500_000, 6), 2.5);
    }
}
