//! WireGuard keys

use std::fmt;
use std::str::FromStr;

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Length of a Curve25519 key in bytes
pub const KEY_LEN: usize = 32;

/// A 32-byte WireGuard key (private, public or preshared)
///
/// Configuration files carry keys as base64; the UAPI carries them as
/// lowercase hex. `Debug` never prints key material.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Key([u8; KEY_LEN]);

impl Key {
    /// Wrap raw key bytes
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a base64 key
    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = BASE64_STANDARD
            .decode(s.trim())
            .map_err(|e| Error::InvalidKey(format!("bad base64: {}", e)))?;
        Self::from_slice(&bytes)
    }

    /// Decode a hex key (UAPI form)
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim()).map_err(|e| Error::InvalidKey(format!("bad hex: {}", e)))?;
        Self::from_slice(&bytes)
    }

    fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            Error::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, bytes.len()))
        })?;
        Ok(Self(array))
    }

    /// Encode as base64
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.0)
    }

    /// Encode as lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// The UAPI reports an unset preshared key as all zeroes
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(..)")
    }
}

/// Keys display as base64, the form users see in configuration files
impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_base64(s)
    }
}

impl TryFrom<String> for Key {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_base64(&s)
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.to_base64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_B64: &str = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=";

    #[test]
    fn test_base64_hex_conversion() {
        let key = Key::from_base64(SAMPLE_B64).unwrap();
        assert_eq!(key.to_base64(), SAMPLE_B64);

        let hex = key.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(Key::from_hex(&hex).unwrap(), key);
    }

    #[test]
    fn test_wrong_length() {
        assert!(Key::from_base64("AAAA").is_err());
        assert!(Key::from_hex("00ff").is_err());
        assert!(Key::from_hex("zz").is_err());
    }

    #[test]
    fn test_debug_hides_material() {
        let key = Key::from_base64(SAMPLE_B64).unwrap();
        assert_eq!(format!("{:?}", key), "Key(..)");
    }

    #[test]
    fn test_zero() {
        assert!(Key::from_bytes([0; KEY_LEN]).is_zero());
        assert!(!Key::from_base64(SAMPLE_B64).unwrap().is_zero());
    }
}
