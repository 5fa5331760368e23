#![allow(dead_code)]

use alloy::primitives::keccak256;
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// EVM address (20 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvmAddress(pub [u8; 20]);

impl EvmAddress {
    /// Create from hex string (with or without 0x prefix)
    pub fn from_hex(hex: &str) -> Result<Self, eyre::Error> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let bytes = hex::decode(hex)?;
        if bytes.len() != 20 {
            return Err(eyre!("EvmAddress must be 20 bytes"));
        }
        let mut result = [0u8; 20];
        result.copy_from_slice(&bytes);
        Ok(EvmAddress(result))
    }

    /// Convert to checksummed hex string with 0x prefix
    pub fn as_hex(&self) -> String {
        let bytes32 = self.as_bytes32();
        let bytes = bytes32.as_slice();
        let hex_lower = hex::encode_upper(bytes);
        let mut result = String::with_capacity(42);
        result.push('0');
        result.push('x');
        for (i, c) in hex_lower.chars().enumerate() {
            let byte = bytes[i];
            let uppercase = if byte & 0x80 != 0 {
                c.to_ascii_uppercase()
            } else {
                c
            };
            result.push(uppercase);
        }
        result
    }

    /// Convert to bytes32 (left-padded with zeros)
    pub fn as_bytes32(&self) -> [u8; 32] {
        let mut result = [0u8; 32];
        result[12..].copy_from_slice(&self.0);
        result
    }

    /// Create from bytes32 (extract last 20 bytes)
    pub fn from_bytes32(bytes: &[u8; 32]) -> Self {
        let mut result = [0u8; 20];
        result.copy_from_slice(&bytes[12..]);
        EvmAddress(result)
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

/// A 32-byte identifier derived from an EVM address, the join key between
/// the chain side and the ledger side (users.fingerprint, bridge_events.user_fingerprint).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn from_evm_address(addr: &EvmAddress) -> Self {
        Fingerprint(keccak256(addr.0).0)
    }

    /// Accepts either accepted stored/query form (with or without `0x`).
    pub fn from_hex(hex: &str) -> Result<Self, eyre::Error> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let bytes = hex::decode(hex)?;
        if bytes.len() != 32 {
            return Err(eyre!("Fingerprint must be 32 bytes"));
        }
        let mut result = [0u8; 32];
        result.copy_from_slice(&bytes);
        Ok(Fingerprint(result))
    }

    /// Canonical storage form.
    pub fn prefixed(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// The other accepted query form.
    pub fn unprefixed(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefixed())
    }
}

/// Direction of a single cross-chain transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
pub enum Direction {
    CantonToEthereum,
    EthereumToCanton,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::CantonToEthereum => "canton_to_ethereum",
            Direction::EthereumToCanton => "ethereum_to_canton",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a `Transfer` row: create-if-absent, then a single transition
/// pending -> completed|failed; never mutated again once terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of persisted mint/burn ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
pub enum BridgeEventType {
    Mint,
    Burn,
}

impl BridgeEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeEventType::Mint => "mint",
            BridgeEventType::Burn => "burn",
        }
    }
}

impl fmt::Display for BridgeEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The two token symbols this facade custodies balances for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
pub enum Symbol {
    Prompt,
    Demo,
}

impl Symbol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Symbol::Prompt => "PROMPT",
            Symbol::Demo => "DEMO",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PROMPT" => Some(Symbol::Prompt),
            "DEMO" => Some(Symbol::Demo),
            _ => None,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Precomputed `Transfer(address,address,uint256)` log topic, computed once
/// per process rather than re-hashed on every synthetic log emission.
pub static TRANSFER_EVENT_TOPIC: once_cell::sync::Lazy<[u8; 32]> =
    once_cell::sync::Lazy::new(|| keccak256(b"Transfer(address,address,uint256)").0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evm_address_from_hex() {
        let addr = EvmAddress::from_hex("0xdead0000000000000000000000000000000000").unwrap();
        assert_eq!(addr.0[0], 0xde);
        assert_eq!(addr.0[1], 0xad);
    }

    #[test]
    fn test_evm_address_from_hex_without_prefix() {
        let addr = EvmAddress::from_hex("dead0000000000000000000000000000000000").unwrap();
        assert_eq!(addr.0[0], 0xde);
    }

    #[test]
    fn test_evm_address_invalid_length() {
        let result = EvmAddress::from_hex("0xdead");
        assert!(result.is_err());
    }

    #[test]
    fn test_evm_address_bytes32_roundtrip() {
        let addr = EvmAddress::from_hex("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb9226").unwrap();
        let bytes32 = addr.as_bytes32();
        let recovered = EvmAddress::from_bytes32(&bytes32);
        assert_eq!(addr, recovered);
    }

    #[test]
    fn test_fingerprint_from_evm_address_is_32_bytes() {
        let addr = EvmAddress::from_hex("0x0000000000000000000000000000000000000001").unwrap();
        let fp = Fingerprint::from_evm_address(&addr);
        assert_eq!(fp.0.len(), 32);
    }

    #[test]
    fn test_fingerprint_prefixed_unprefixed_agree() {
        let addr = EvmAddress::from_hex("0x0000000000000000000000000000000000000001").unwrap();
        let fp = Fingerprint::from_evm_address(&addr);
        assert!(fp.prefixed().starts_with("0x"));
        assert_eq!(fp.unprefixed(), fp.prefixed().trim_start_matches("0x"));
    }

    #[test]
    fn test_fingerprint_hex_roundtrip_either_form() {
        let addr = EvmAddress::from_hex("0x0000000000000000000000000000000000000002").unwrap();
        let fp = Fingerprint::from_evm_address(&addr);
        let parsed_prefixed = Fingerprint::from_hex(&fp.prefixed()).unwrap();
        let parsed_unprefixed = Fingerprint::from_hex(&fp.unprefixed()).unwrap();
        assert_eq!(fp, parsed_prefixed);
        assert_eq!(fp, parsed_unprefixed);
    }

    #[test]
    fn test_fingerprint_differs_by_address() {
        let a = EvmAddress::from_hex("0x0000000000000000000000000000000000000001").unwrap();
        let b = EvmAddress::from_hex("0x0000000000000000000000000000000000000002").unwrap();
        assert_ne!(Fingerprint::from_evm_address(&a), Fingerprint::from_evm_address(&b));
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::CantonToEthereum.to_string(), "canton_to_ethereum");
        assert_eq!(Direction::EthereumToCanton.to_string(), "ethereum_to_canton");
    }

    #[test]
    fn test_transfer_status_terminal() {
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
    }

    #[test]
    fn test_transfer_status_display() {
        assert_eq!(format!("{}", TransferStatus::Pending), "pending");
        assert_eq!(format!("{}", TransferStatus::Completed), "completed");
    }

    #[test]
    fn test_bridge_event_type_display() {
        assert_eq!(BridgeEventType::Mint.to_string(), "mint");
        assert_eq!(BridgeEventType::Burn.to_string(), "burn");
    }

    #[test]
    fn test_symbol_display_and_parse() {
        assert_eq!(Symbol::Prompt.as_str(), "PROMPT");
        assert_eq!(Symbol::from_str_loose("demo"), Some(Symbol::Demo));
        assert_eq!(Symbol::from_str_loose("bogus"), None);
    }

    #[test]
    fn test_transfer_topic_is_32_bytes() {
        assert_eq!(TRANSFER_EVENT_TOPIC.len(), 32);
    }
}
