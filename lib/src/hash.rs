//! Double-SHA-256 digests used for transaction ids and block hashes.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A 32-byte double-SHA-256 digest, serialized as lowercase hex everywhere
/// it appears on the wire or on disk.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn zero() -> Self {
        Hash([0u8; 32])
    }

    /// SHA-256 applied twice, per `crypto::double_sha256`.
    pub fn of(bytes: &[u8]) -> Self {
        Hash(crate::crypto::double_sha256(bytes))
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Hash(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// True if the first `min_zeros` bits of the digest are zero.
    pub fn leading_zero_bits_at_least(&self, min_zeros: u32) -> bool {
        let full_bytes = (min_zeros / 8) as usize;
        let rem_bits = min_zeros % 8;

        if self.0.iter().take(full_bytes).any(|&b| b != 0) {
            return false;
        }
        if rem_bits == 0 {
            return true;
        }
        match self.0.get(full_bytes) {
            Some(b) => b.leading_zeros() >= rem_bits,
            None => true,
        }
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).ok_or_else(|| D::Error::custom("invalid hash hex"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_zero_bits() {
        let mut h = Hash::zero();
        h.0[0] = 0x00;
        h.0[1] = 0x0f;
        assert!(h.leading_zero_bits_at_least(12));
        assert!(!h.leading_zero_bits_at_least(13));
    }

    #[test]
    fn hex_roundtrip() {
        let h = Hash::of(b"hello");
        let s = h.to_hex();
        assert_eq!(Hash::from_hex(&s), Some(h));
    }
}
