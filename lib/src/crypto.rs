//! ECDSA over secp256k1 with a SHA-256 digest, and the double-SHA-256 used
//! for transaction ids and block hashes. Grounded in `crypto.py`'s thin
//! wrapper over the `ecdsa` package: one curve, one digest, raw bytes for
//! the wire, PEM for disk.

use ecdsa::signature::{Signer, Verifier};
use elliptic_curve::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use elliptic_curve::pkcs8::LineEnding;
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// SHA-256 applied twice. Every hash fed into a signature, transaction id,
/// or block hash in this system is a double-SHA-256 digest.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let once = sha256::digest(data);
    let once_bytes = hex::decode(once).expect("sha256 hex digest is well-formed");
    let twice = sha256::digest(&once_bytes[..]);
    let twice_bytes = hex::decode(twice).expect("sha256 hex digest is well-formed");
    twice_bytes.try_into().expect("sha256 digest is 32 bytes")
}

#[derive(Clone)]
pub struct PrivateKey(SigningKey);

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

#[derive(Clone)]
pub struct SignatureBytes(Signature);

impl PrivateKey {
    pub fn generate() -> Self {
        PrivateKey(SigningKey::random(&mut rand::thread_rng()))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(*self.0.verifying_key())
    }

    pub fn sign(&self, payload: &[u8]) -> SignatureBytes {
        SignatureBytes(self.0.sign(payload))
    }

    pub fn to_raw_bytes(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }

    pub fn from_raw_bytes(bytes: &[u8]) -> Option<Self> {
        SigningKey::from_slice(bytes).ok().map(PrivateKey)
    }

    pub fn to_pem(&self) -> String {
        self.0
            .to_pkcs8_pem(LineEnding::LF)
            .expect("signing key encodes to pkcs8 pem")
            .to_string()
    }

    pub fn from_pem(pem: &str) -> Option<Self> {
        SigningKey::from_pkcs8_pem(pem).ok().map(PrivateKey)
    }
}

impl PublicKey {
    pub fn verify(&self, payload: &[u8], signature: &SignatureBytes) -> bool {
        self.0.verify(payload, &signature.0).is_ok()
    }

    pub fn to_raw_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }

    pub fn from_raw_bytes(bytes: &[u8]) -> Option<Self> {
        VerifyingKey::from_sec1_bytes(bytes).ok().map(PublicKey)
    }

    pub fn to_pem(&self) -> String {
        self.0
            .to_public_key_pem(LineEnding::LF)
            .expect("verifying key encodes to public key pem")
    }

    pub fn from_pem(pem: &str) -> Option<Self> {
        VerifyingKey::from_public_key_pem(pem).ok().map(PublicKey)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_raw_bytes())
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Self::from_raw_bytes(&bytes)
    }
}

impl SignatureBytes {
    pub fn to_raw_bytes(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }

    pub fn from_raw_bytes(bytes: &[u8]) -> Option<Self> {
        Signature::from_slice(bytes).ok().map(SignatureBytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_raw_bytes())
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Self::from_raw_bytes(&bytes)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(..)")
    }
}

impl fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({})", self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_hex(&s).ok_or_else(|| D::Error::custom("invalid public key hex"))
    }
}

impl Serialize for SignatureBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SignatureBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SignatureBytes::from_hex(&s).ok_or_else(|| D::Error::custom("invalid signature hex"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let key = PrivateKey::generate();
        let pub_key = key.public_key();
        let sig = key.sign(b"payload");
        assert!(pub_key.verify(b"payload", &sig));
        assert!(!pub_key.verify(b"tampered", &sig));
    }

    #[test]
    fn verify_never_panics_on_malformed_signature() {
        let key = PrivateKey::generate();
        let pub_key = key.public_key();
        assert!(SignatureBytes::from_raw_bytes(b"not a signature").is_none());
        let garbage = PrivateKey::generate().sign(b"other payload");
        assert!(!pub_key.verify(b"payload", &garbage));
    }

    #[test]
    fn double_sha256_matches_two_rounds() {
        let once = sha256::digest("abc");
        let once_bytes = hex::decode(once).unwrap();
        let twice = sha256::digest(&once_bytes[..]);
        let expected: [u8; 32] = hex::decode(twice).unwrap().try_into().unwrap();
        assert_eq!(double_sha256(b"abc"), expected);
    }

    #[test]
    fn pem_roundtrip() {
        let key = PrivateKey::generate();
        let pem = key.to_pem();
        let loaded = PrivateKey::from_pem(&pem).unwrap();
        assert_eq!(loaded.public_key(), key.public_key());

        let pub_pem = key.public_key().to_pem();
        let loaded_pub = PublicKey::from_pem(&pub_pem).unwrap();
        assert_eq!(loaded_pub, key.public_key());
    }
}
