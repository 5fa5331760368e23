//! Minimal ERC-20 ABI codec: just enough selector dispatch and
//! word-at-a-time encoding to answer `eth_call` and emit a synthetic
//! `Transfer` log, without pulling in a full ABI-encoding crate for a
//! half-dozen fixed shapes.

use alloy::primitives::keccak256;
use once_cell::sync::Lazy;

fn selector(signature: &[u8]) -> [u8; 4] {
    let hash = keccak256(signature);
    [hash[0], hash[1], hash[2], hash[3]]
}

pub static NAME_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| selector(b"name()"));
pub static SYMBOL_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| selector(b"symbol()"));
pub static DECIMALS_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| selector(b"decimals()"));
pub static TOTAL_SUPPLY_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| selector(b"totalSupply()"));
pub static BALANCE_OF_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| selector(b"balanceOf(address)"));
pub static ALLOWANCE_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| selector(b"allowance(address,address)"));
pub static TRANSFER_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| selector(b"transfer(address,uint256)"));

/// Left-pads a value into a 32-byte ABI word.
pub fn word_from_bytes(bytes: &[u8]) -> [u8; 32] {
    let mut word = [0u8; 32];
    let start = 32 - bytes.len().min(32);
    word[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(32)..]);
    word
}

pub fn word_from_u256(value: alloy::primitives::U256) -> [u8; 32] {
    value.to_be_bytes::<32>()
}

pub fn word_from_address(address: &[u8; 20]) -> [u8; 32] {
    word_from_bytes(address)
}

/// ABI-encodes a `string` return value: offset word, length word, then the
/// bytes right-padded to a 32-byte boundary.
pub fn encode_string(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(64 + bytes.len().div_ceil(32) * 32);
    out.extend_from_slice(&word_from_u256(alloy::primitives::U256::from(32u64)));
    out.extend_from_slice(&word_from_u256(alloy::primitives::U256::from(bytes.len() as u64)));
    out.extend_from_slice(bytes);
    let padding = (32 - bytes.len() % 32) % 32;
    out.extend(std::iter::repeat(0u8).take(padding));
    out
}

/// Extracts the last 20 bytes of the ABI word at `params[offset..offset+32]`
/// as an address argument.
pub fn read_address_arg(data: &[u8], word_index: usize) -> Option<[u8; 20]> {
    let start = 4 + word_index * 32;
    let word = data.get(start..start + 32)?;
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&word[12..32]);
    Some(addr)
}

pub fn read_u256_arg(data: &[u8], word_index: usize) -> Option<alloy::primitives::U256> {
    let start = 4 + word_index * 32;
    let word = data.get(start..start + 32)?;
    Some(alloy::primitives::U256::from_be_slice(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_of_selector_is_stable() {
        assert_eq!(*BALANCE_OF_SELECTOR, [0x70, 0xa0, 0x82, 0x31]);
    }

    #[test]
    fn test_transfer_selector_is_stable() {
        assert_eq!(*TRANSFER_SELECTOR, [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn test_encode_string_round_shape() {
        let encoded = encode_string("PROMPT");
        assert_eq!(encoded.len(), 96);
        assert_eq!(encoded[31], 0x20);
        assert_eq!(encoded[63], 6);
    }

    #[test]
    fn test_read_address_arg() {
        let mut data = vec![0u8; 4 + 32];
        data[4 + 31] = 0xab;
        let addr = read_address_arg(&data, 0).unwrap();
        assert_eq!(addr[19], 0xab);
    }
}
