//! Decimals-aware wei <-> decimal-string conversion for the EVM facade.
//!
//! Distinct from `engine::decimal_to_wei`/`wei_to_decimal`, which move bridge
//! amounts between the ledger and the chain as pure integers with no
//! fractional scaling. Here the facade's `balanceOf`, `totalSupply` and
//! `eth_sendRawTransaction` handlers present the cache's plain decimal
//! strings as `decimals`-scaled wei, and back, using the configured token's
//! decimal count (`config.token.decimals`).

use std::str::FromStr;

use alloy::primitives::U256;
use bigdecimal::BigDecimal;

use crate::error::{BridgeError, BridgeResult};

fn pow10(decimals: u8) -> BigDecimal {
    BigDecimal::from_str(&format!("1{}", "0".repeat(decimals as usize)))
        .expect("power-of-ten literal always parses")
}

/// `decimal_string * 10^decimals`, truncating any fractional wei.
pub fn decimal_to_wei(amount: &BigDecimal, decimals: u8) -> BridgeResult<U256> {
    let scaled = (amount * pow10(decimals)).with_scale(0);
    U256::from_str(&scaled.to_string()).map_err(|e| {
        BridgeError::Internal(eyre::eyre!(
            "amount {amount} not representable as wei at {decimals} decimals: {e}"
        ))
    })
}

/// `wei / 10^decimals`, formatted with exactly `decimals` fractional digits.
pub fn wei_to_decimal_string(wei: U256, decimals: u8) -> String {
    let raw = BigDecimal::from_str(&wei.to_string()).unwrap_or_else(|_| BigDecimal::from(0));
    (raw / pow10(decimals))
        .with_scale(decimals as i64)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_to_wei_scales_by_decimals() {
        let amount = BigDecimal::from_str("1.5").unwrap();
        let wei = decimal_to_wei(&amount, 18).unwrap();
        assert_eq!(wei, U256::from(1_500_000_000_000_000_000u128));
    }

    #[test]
    fn test_decimal_to_wei_truncates_sub_wei_fraction() {
        let amount = BigDecimal::from_str("0.0000000000000000005").unwrap();
        let wei = decimal_to_wei(&amount, 18).unwrap();
        assert_eq!(wei, U256::ZERO);
    }

    #[test]
    fn test_wei_to_decimal_string_roundtrip() {
        let wei = U256::from(1_500_000_000_000_000_000u128);
        let s = wei_to_decimal_string(wei, 18);
        assert_eq!(s, "1.500000000000000000");
        let back = decimal_to_wei(&BigDecimal::from_str(&s).unwrap(), 18).unwrap();
        assert_eq!(back, wei);
    }

    #[test]
    fn test_wei_to_decimal_string_zero_decimals() {
        assert_eq!(wei_to_decimal_string(U256::from(42u64), 0), "42");
    }
}
