//! Monetary units, identifiers and time constants shared across the workspace.
//!
//! All amounts are integers in token base units; nothing in the engine uses
//! floating point.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Token amount in base units (18-decimal tokens fit comfortably in u128).
pub type Amount = u128;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Slot identifier in `[1, max_supply]`.
pub type UnitId = u32;

/// Issuance campaign identifier (monotonic, starting at 1).
pub type BatchId = u32;

/// Marketplace order identifier (monotonic, starting at 1).
pub type OrderId = u32;

/// Vesting schedule identifier (monotonic, starting at 1).
pub type ScheduleId = u64;

/// Decimals used by the native token and the default payment token.
pub const TOKEN_DECIMALS: u32 = 18;

/// 1 whole token = 10^18 base units.
pub const BASE_UNITS_PER_TOKEN: Amount = 10u128.pow(TOKEN_DECIMALS);

/// Basis-point denominator (10000 = 100%).
pub const BPS_DENOMINATOR: u128 = 10_000;

pub const SECONDS_PER_DAY: Timestamp = 86_400;
pub const SECONDS_PER_YEAR: Timestamp = 365 * SECONDS_PER_DAY;

/// Convert whole tokens to base units (saturating)
#[inline]
pub const fn tokens(whole: u128) -> Amount {
    whole.saturating_mul(BASE_UNITS_PER_TOKEN)
}

/// Convert days to seconds
#[inline]
pub const fn days(n: u64) -> Timestamp {
    n * SECONDS_PER_DAY
}

/// `n * mul / div` with overflow and zero-divisor detection.
#[inline]
pub fn mul_div_u128(n: u128, mul: u128, div: u128) -> Option<u128> {
    if div == 0 {
        return None;
    }
    n.checked_mul(mul).map(|product| product / div)
}

/// Portion of `amount` expressed by `bps` basis points, rounded down.
#[inline]
pub fn bps_of(amount: Amount, bps: u16) -> Option<Amount> {
    mul_div_u128(amount, bps as u128, BPS_DENOMINATOR)
}

/// Serde adapter writing amounts as decimal strings.
///
/// TOML integers stop at i64, and 18-decimal amounts overflow that quickly.
/// Deserialisation accepts either a string (underscores allowed) or a plain
/// integer.
pub mod amount_serde {
    use super::Amount;
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Int(u64),
        Str(String),
    }

    pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Int(n) => Ok(n as Amount),
            Repr::Str(s) => s.replace('_', "").parse().map_err(de::Error::custom),
        }
    }
}

/// Identifier of a fungible token known to the engine (e.g. `"UVT"`, `"USDT"`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub String);

impl TokenId {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenId({})", self.0)
    }
}

impl From<&str> for TokenId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
