//! Hex quantity parsing and exact decimal scaling.
//!
//! Chain values arrive as `0x`-prefixed hex. Everything here stays in integer
//! arithmetic; the only display policy is trimming trailing fractional zeros.

use std::fmt;

use alloy_primitives::U256;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ChainError, Result};

/// Parse a `0x`-prefixed hex quantity. Empty input and bare `0x` are zero.
pub fn hex_to_integer(hex: &str) -> Result<U256> {
    if hex.is_empty() {
        return Ok(U256::ZERO);
    }
    let digits = hex
        .strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .ok_or_else(|| ChainError::Format(format!("hex quantity {hex:?} lacks 0x prefix")))?;

    if let Some(bad) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(ChainError::Format(format!("invalid hex digit {bad:?} in {hex:?}")));
    }

    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return Ok(U256::ZERO);
    }
    if significant.len() > 64 {
        return Err(ChainError::Format(format!("hex quantity {hex:?} exceeds 256 bits")));
    }

    U256::from_str_radix(significant, 16)
        .map_err(|e| ChainError::Format(format!("invalid hex quantity {hex:?}: {e}")))
}

/// Render `raw / 10^decimals` exactly, e.g. `123456` at 8 decimals is `0.00123456`.
pub fn scale_to_decimal(raw: U256, decimals: u8) -> String {
    let digits = raw.to_string();
    if decimals == 0 {
        return digits;
    }

    let decimals = decimals as usize;
    let padded = if digits.len() <= decimals {
        format!("{digits:0>width$}", width = decimals + 1)
    } else {
        digits
    };

    let (integer, fraction) = padded.split_at(padded.len() - decimals);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        format!("{integer}.0")
    } else {
        format!("{integer}.{fraction}")
    }
}

/// Canonical quantity encoding: no leading zeros, zero is `0x0`.
pub fn to_hex_quantity(value: U256) -> String {
    if value.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{value:x}")
    }
}

/// Unsigned chain quantity, validated when deserialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HexQuantity(pub U256);

impl HexQuantity {
    /// Narrow to `u64` for block numbers, timestamps and indexes.
    pub fn as_u64(self) -> Result<u64> {
        let limbs = self.0.as_limbs();
        if limbs[1..].iter().any(|limb| *limb != 0) {
            return Err(ChainError::Format(format!("quantity {} does not fit in 64 bits", self.0)));
        }
        Ok(limbs[0])
    }
}

impl From<u64> for HexQuantity {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl fmt::Display for HexQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_hex_quantity(self.0))
    }
}

impl Serialize for HexQuantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_hex_quantity(self.0))
    }
}

impl<'de> Deserialize<'de> for HexQuantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex_to_integer(&raw).map(HexQuantity).map_err(de::Error::custom)
    }
}
