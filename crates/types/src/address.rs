use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors that can occur when parsing a unitvault address string.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("address must start with 'u'")]
    InvalidPrefix,
    #[error("address must be {expected} characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("address payload is not valid hexadecimal")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("address payload must be exactly 32 bytes")]
    InvalidPayloadLength,
}

/// Number of raw bytes contained in an address.
pub const ADDRESS_BYTES: usize = 32;
/// Expected string length of an encoded address (prefix + 64 hex chars).
pub const ADDRESS_STRING_LENGTH: usize = 1 + ADDRESS_BYTES * 2;

/// Encode a 32-byte account identifier into the human readable format.
///
/// The encoded address always begins with the character `u` followed by the
/// hexadecimal representation of the raw bytes.
pub fn encode_address(bytes: &[u8; ADDRESS_BYTES]) -> String {
    let mut encoded = String::with_capacity(ADDRESS_STRING_LENGTH);
    encoded.push('u');
    encoded.push_str(&hex::encode(bytes));
    encoded
}

/// Attempt to decode a human readable address string into the raw bytes.
pub fn decode_address(address: &str) -> Result<[u8; ADDRESS_BYTES], AddressError> {
    if !address.starts_with('u') {
        return Err(AddressError::InvalidPrefix);
    }

    if address.len() != ADDRESS_STRING_LENGTH {
        return Err(AddressError::InvalidLength {
            expected: ADDRESS_STRING_LENGTH,
            actual: address.len(),
        });
    }

    let payload = &address[1..];
    let decoded = hex::decode(payload)?;

    let bytes: [u8; ADDRESS_BYTES] = decoded
        .try_into()
        .map_err(|_| AddressError::InvalidPayloadLength)?;

    Ok(bytes)
}

/// Check whether the provided string is a valid address.
pub fn is_valid_address(address: &str) -> bool {
    decode_address(address).is_ok()
}

/// Account identifier for holders, operators and engine-owned custody accounts.
///
/// Serialises as the `u`-prefixed hex string so configuration files and JSON
/// snapshots stay readable.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(pub [u8; ADDRESS_BYTES]);

impl Address {
    /// Derive a deterministic address from a label (no private key exists for it).
    ///
    /// Used for engine-owned accounts such as the unit custody and the vesting
    /// custody, and for readable fixtures.
    pub fn derive(label: &str) -> Self {
        let hash = blake3::hash(label.as_bytes());
        Address(*hash.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_BYTES] {
        &self.0
    }
}

impl From<[u8; ADDRESS_BYTES]> for Address {
    fn from(value: [u8; ADDRESS_BYTES]) -> Self {
        Address(value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        encode_address(&value.0)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        decode_address(&value).map(Address)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_address(s).map(Address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_address(&self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 4 bytes are enough to tell fixtures apart in logs.
        write!(f, "u{}..", hex::encode(&self.0[..4]))
    }
}
