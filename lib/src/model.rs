//! Transactions and blocks, and the canonical JSON/byte layouts that back
//! their hashes and signatures. Field order below is load-bearing: `serde`
//! serializes struct fields in declaration order, and that order is the
//! canonical JSON required for the hashes and signatures to line up.

use crate::crypto::{double_sha256, PrivateKey, PublicKey, SignatureBytes};
use crate::hash::Hash;
use crate::U256;
use serde::{Deserialize, Serialize};

/// Reference to a prior transaction's output.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxnInput {
    pub txn_id: Hash,
    pub index: u32,
}

impl TxnInput {
    pub fn new(txn_id: Hash, index: u32) -> Self {
        TxnInput { txn_id, index }
    }

    /// `to_bytes()` in the original — the exact bytes fed into the
    /// per-output signing payload.
    fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("TxnInput always serializes")
    }
}

/// A transaction output ("coin"). `spent` is a chain-local bookkeeping flag
/// and is never part of the canonical JSON or any hash/signature payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxnOutput {
    pub pub_key: PublicKey,
    pub amount: u64,
    #[serde(serialize_with = "serialize_signature_opt", default, deserialize_with = "deserialize_signature_opt")]
    pub signature: Option<SignatureBytes>,
    #[serde(skip)]
    pub spent: bool,
}

fn serialize_signature_opt<S: serde::Serializer>(
    sig: &Option<SignatureBytes>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match sig {
        Some(s) => s.serialize(serializer),
        None => serializer.serialize_str(""),
    }
}

fn deserialize_signature_opt<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<SignatureBytes>, D::Error> {
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(None)
    } else {
        Ok(SignatureBytes::from_hex(&s))
    }
}

impl TxnOutput {
    pub fn new(pub_key: PublicKey, amount: u64) -> Self {
        TxnOutput {
            pub_key,
            amount,
            signature: None,
            spent: false,
        }
    }

    pub fn hash(&self) -> Hash {
        Hash::of(&serde_json::to_vec(self).expect("TxnOutput always serializes"))
    }
}

impl PartialEq for TxnOutput {
    fn eq(&self, other: &Self) -> bool {
        self.pub_key == other.pub_key
            && self.amount == other.amount
            && self.signature.as_ref().map(|s| s.to_hex()) == other.signature.as_ref().map(|s| s.to_hex())
    }
}
impl Eq for TxnOutput {}

/// A transaction: an ordered, non-empty list of inputs and outputs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub txn_id: Hash,
    pub inputs: Vec<TxnInput>,
    pub outputs: Vec<TxnOutput>,
}

impl Transaction {
    /// Build an unsigned, unhashed transaction. Call `sign` before use.
    pub fn unsigned(inputs: Vec<TxnInput>, outputs: Vec<TxnOutput>) -> Self {
        Transaction {
            txn_id: Hash::zero(),
            inputs,
            outputs,
        }
    }

    /// `compute_txn_id` — hashes `json(inputs_array) ++ json(outputs_array)`.
    pub fn compute_txn_id(&self) -> Hash {
        let mut data = Vec::new();
        data.extend(serde_json::to_vec(&self.inputs).expect("inputs always serialize"));
        data.extend(serde_json::to_vec(&self.outputs).expect("outputs always serialize"));
        Hash::of(&data)
    }

    fn inputs_bytes(&self) -> Vec<u8> {
        let mut data = Vec::new();
        for input in &self.inputs {
            data.extend(input.canonical_bytes());
        }
        data
    }

    /// Signs every output with `sender_key`, then recomputes `txn_id`.
    /// Idempotent: re-signing with the same inputs/outputs/key reproduces
    /// the same signatures and id.
    pub fn sign(&mut self, sender_key: &PrivateKey) {
        self.sign_with_context(sender_key, &[]);
    }

    /// Signs a coinbase, binding the signature to the block it's mined
    /// into via `prev_hash`/`height`. A coinbase has empty inputs and a
    /// single output paying the miner's own key, so without this its
    /// signing payload is `double_sha256(pub_key)` — identical for every
    /// block that miner ever produces under `k256`'s deterministic ECDSA,
    /// which would collide with the duplicate-transaction-id guard past
    /// the first block it mines.
    pub fn sign_coinbase(&mut self, sender_key: &PrivateKey, prev_hash: Hash, height: u32) {
        self.sign_with_context(sender_key, &coinbase_context(prev_hash, height));
    }

    fn sign_with_context(&mut self, sender_key: &PrivateKey, extra: &[u8]) {
        let inputs_bytes = self.inputs_bytes();
        for output in &mut self.outputs {
            let payload = signing_payload(&inputs_bytes, &output.pub_key, extra);
            output.signature = Some(sender_key.sign(&payload));
        }
        self.txn_id = self.compute_txn_id();
    }

    /// Verifies every output's signature against `sender_pub_key`. Returns
    /// false on the first failure (including a missing signature).
    pub fn verify_signature(&self, sender_pub_key: &PublicKey) -> bool {
        self.verify_signature_with_context(sender_pub_key, &[])
    }

    /// Counterpart to `sign_coinbase`.
    pub fn verify_signature_coinbase(&self, sender_pub_key: &PublicKey, prev_hash: Hash, height: u32) -> bool {
        self.verify_signature_with_context(sender_pub_key, &coinbase_context(prev_hash, height))
    }

    fn verify_signature_with_context(&self, sender_pub_key: &PublicKey, extra: &[u8]) -> bool {
        let inputs_bytes = self.inputs_bytes();
        for output in &self.outputs {
            let payload = signing_payload(&inputs_bytes, &output.pub_key, extra);
            let ok = match &output.signature {
                Some(sig) => sender_pub_key.verify(&payload, sig),
                None => false,
            };
            if !ok {
                return false;
            }
        }
        true
    }

    pub fn to_message(&self) -> serde_json::Value {
        serde_json::json!({ "type": "transaction", "data": self })
    }
}

fn coinbase_context(prev_hash: Hash, height: u32) -> Vec<u8> {
    let mut extra = prev_hash.as_bytes().to_vec();
    extra.extend_from_slice(&height.to_be_bytes());
    extra
}

/// §3 invariant (7): payload is `double_sha256(concat(json(inputs)) ‖ output.pub_key ‖ extra)`.
/// `extra` is empty for an ordinary transfer and `prev_hash ‖ height_be32` for
/// a coinbase, so the otherwise-constant coinbase payload varies per block.
fn signing_payload(inputs_bytes: &[u8], output_pub_key: &PublicKey, extra: &[u8]) -> Vec<u8> {
    let mut buf = inputs_bytes.to_vec();
    buf.extend(output_pub_key.to_raw_bytes());
    buf.extend_from_slice(extra);
    double_sha256(&buf).to_vec()
}

/// A block: a non-empty ordered sequence of transactions (first is
/// coinbase) bound to a predecessor by hash.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    #[serde(rename = "hash")]
    pub block_hash: Hash,
    pub prev_hash: Hash,
    pub height: u32,
    pub nonce: U256,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Builds a block with `nonce = 0` and a freshly-computed hash.
    pub fn compose(prev_hash: Hash, height: u32, transactions: Vec<Transaction>) -> Self {
        let mut block = Block {
            block_hash: Hash::zero(),
            prev_hash,
            height,
            nonce: U256::zero(),
            transactions,
        };
        block.block_hash = block.compute_hash(block.nonce);
        block
    }

    pub fn set_nonce(&mut self, nonce: U256) {
        self.nonce = nonce;
        self.block_hash = self.compute_hash(nonce);
    }

    /// §3 invariant (1): `double_sha256(prev_hash ‖ height_be32 ‖ nonce_be256 ‖ canonical_json(transactions))`.
    pub fn compute_hash(&self, nonce: U256) -> Hash {
        let mut data = Vec::with_capacity(32 + 4 + 32 + 256);
        data.extend_from_slice(self.prev_hash.as_bytes());
        data.extend_from_slice(&self.height.to_be_bytes());

        let mut nonce_bytes = [0u8; 32];
        nonce.to_big_endian(&mut nonce_bytes);
        data.extend_from_slice(&nonce_bytes);

        data.extend(serde_json::to_vec(&self.transactions).expect("transactions always serialize"));
        Hash::of(&data)
    }

    pub fn coinbase(&self) -> &Transaction {
        &self.transactions[0]
    }

    pub fn to_message(&self) -> serde_json::Value {
        serde_json::json!({ "type": "block", "data": self })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;

    fn signed_coinbase(key: &PrivateKey, amount: u64) -> Transaction {
        let mut txn = Transaction::unsigned(vec![], vec![TxnOutput::new(key.public_key(), amount)]);
        txn.sign(key);
        txn
    }

    #[test]
    fn txn_round_trip() {
        let key = PrivateKey::generate();
        let txn = signed_coinbase(&key, 50);
        let json = serde_json::to_string(&txn).unwrap();
        let parsed: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(txn, parsed);
        assert_eq!(txn.txn_id, txn.compute_txn_id());
    }

    #[test]
    fn block_round_trip_and_hash_stable() {
        let key = PrivateKey::generate();
        let txn = signed_coinbase(&key, 50);
        let mut block = Block::compose(Hash::zero(), 0, vec![txn]);
        block.set_nonce(U256::from(42u64));

        let json = serde_json::to_string(&block).unwrap();
        let parsed: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(block, parsed);
        assert_eq!(block.block_hash, block.compute_hash(block.nonce));
    }

    #[test]
    fn signing_is_idempotent() {
        let key = PrivateKey::generate();
        let mut txn = Transaction::unsigned(vec![], vec![TxnOutput::new(key.public_key(), 50)]);
        txn.sign(&key);
        let first_id = txn.txn_id;
        let first_sig = txn.outputs[0].signature.as_ref().unwrap().to_hex();

        txn.sign(&key);
        assert_eq!(txn.txn_id, first_id);
        assert_eq!(txn.outputs[0].signature.as_ref().unwrap().to_hex(), first_sig);
    }

    #[test]
    fn verify_signature_detects_tampering() {
        let key = PrivateKey::generate();
        let mut txn = signed_coinbase(&key, 50);
        assert!(txn.verify_signature(&key.public_key()));
        txn.outputs[0].amount = 999;
        assert!(!txn.verify_signature(&key.public_key()));
    }

    #[test]
    fn coinbase_txn_id_varies_by_block() {
        let key = PrivateKey::generate();

        let mut a = Transaction::unsigned(vec![], vec![TxnOutput::new(key.public_key(), 50)]);
        a.sign_coinbase(&key, Hash::zero(), 1);

        let mut b = Transaction::unsigned(vec![], vec![TxnOutput::new(key.public_key(), 50)]);
        b.sign_coinbase(&key, Hash::zero(), 2);

        assert_ne!(a.txn_id, b.txn_id);
        assert!(a.verify_signature_coinbase(&key.public_key(), Hash::zero(), 1));
        assert!(!a.verify_signature_coinbase(&key.public_key(), Hash::zero(), 2));
    }
}
