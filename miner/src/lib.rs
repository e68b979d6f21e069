//! The miner: coinbase construction, pending-set management, and nonce
//! search. Grounded in `miner.py`. Mining loop orchestration (accepting
//! transactions, reacting to chain-modified events) lives in the `node`
//! binary, which owns the threads; this crate is the pure, single-threaded
//! piece each miner thread drives.

use ndcoin_core::hash::Hash;
use ndcoin_core::crypto::{PrivateKey, PublicKey};
use ndcoin_core::model::{Block, Transaction, TxnOutput};
use ndcoin_core::U256;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Sample a uniformly random 256-bit nonce each attempt.
    Random,
    /// Count up from zero. Resolves the "nonce == 0 sentinel" open
    /// question: exhausting the 256-bit range returns `None` rather than
    /// relying on `next_nonce() == 0` as a falsy loop terminator.
    Increment,
}

pub struct Miner {
    pub_key: PublicKey,
    priv_key: PrivateKey,
    strategy: Strategy,
    mining_reward: u64,
    pending_txns: Vec<Transaction>,
    increment_counter: Option<U256>,
}

impl Miner {
    pub fn new(pub_key: PublicKey, priv_key: PrivateKey, strategy: Strategy, mining_reward: u64) -> Self {
        let mut miner = Miner {
            pub_key,
            priv_key,
            strategy,
            mining_reward,
            pending_txns: Vec::new(),
            increment_counter: None,
        };
        miner.reset_pending_txns();
        miner
    }

    pub fn public_key(&self) -> PublicKey {
        self.pub_key
    }

    /// Clears the pending set and seeds it with an unsigned coinbase
    /// placeholder at index 0. The placeholder only exists so
    /// `num_pending_txns` counts correctly before a block is composed; its
    /// signature is never checked, since `compose_block` replaces it with
    /// one bound to the block actually being built.
    pub fn reset_pending_txns(&mut self) {
        self.pending_txns = vec![Transaction::unsigned(vec![], vec![TxnOutput::new(self.pub_key, self.mining_reward)])];
    }

    pub fn add_pending_txn(&mut self, txn: Transaction) {
        self.pending_txns.push(txn);
    }

    pub fn num_pending_txns(&self) -> usize {
        self.pending_txns.len()
    }

    pub fn pending_txns(&self) -> &[Transaction] {
        &self.pending_txns
    }

    /// Binds a freshly-signed coinbase to `(prev_hash, height)` and builds
    /// the candidate block around it and the rest of the pending set.
    pub fn compose_block(&self, prev_hash: Hash, height: u32) -> Block {
        let mut txns = Vec::with_capacity(self.pending_txns.len());
        txns.push(self.generate_coinbase_txn(prev_hash, height));
        txns.extend(self.pending_txns[1..].iter().cloned());
        Block::compose(prev_hash, height, txns)
    }

    fn generate_coinbase_txn(&self, prev_hash: Hash, height: u32) -> Transaction {
        let mut txn = Transaction::unsigned(vec![], vec![TxnOutput::new(self.pub_key, self.mining_reward)]);
        txn.sign_coinbase(&self.priv_key, prev_hash, height);
        txn
    }

    /// Resets the nonce search cursor (only meaningful for `Increment`).
    pub fn first_nonce(&mut self) {
        self.increment_counter = Some(U256::zero());
    }

    /// The next candidate nonce, or `None` if the search space under the
    /// current strategy is exhausted.
    pub fn next_nonce(&mut self) -> Option<U256> {
        match self.strategy {
            Strategy::Random => {
                let words: [u64; 4] = rand::thread_rng().gen();
                Some(U256(words))
            }
            Strategy::Increment => {
                let current = self.increment_counter?;
                let (next, overflowed) = current.overflowing_add(U256::one());
                self.increment_counter = if overflowed { None } else { Some(next) };
                Some(current)
            }
        }
    }

    pub fn valid_nonce(&self, block: &Block, nonce: U256, min_zeros: u32) -> bool {
        block.compute_hash(nonce).leading_zero_bits_at_least(min_zeros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_seeds_single_coinbase() {
        let key = PrivateKey::generate();
        let miner = Miner::new(key.public_key(), key, Strategy::Increment, 50);
        assert_eq!(miner.num_pending_txns(), 1);
        assert!(miner.pending_txns()[0].inputs.is_empty());
    }

    #[test]
    fn increment_strategy_counts_up() {
        let key = PrivateKey::generate();
        let mut miner = Miner::new(key.public_key(), key, Strategy::Increment, 50);
        miner.first_nonce();
        assert_eq!(miner.next_nonce(), Some(U256::zero()));
        assert_eq!(miner.next_nonce(), Some(U256::from(1u64)));
        assert_eq!(miner.next_nonce(), Some(U256::from(2u64)));
    }

    #[test]
    fn mining_soundness_against_valid_nonce() {
        let key = PrivateKey::generate();
        let mut miner = Miner::new(key.public_key(), key, Strategy::Increment, 50);
        let block = miner.compose_block(Hash::zero(), 1);

        miner.first_nonce();
        let mut found = None;
        for _ in 0..1_000_000 {
            let nonce = miner.next_nonce().expect("increment strategy does not exhaust in this range");
            if miner.valid_nonce(&block, nonce, 8) {
                found = Some(nonce);
                break;
            }
        }
        let nonce = found.expect("a nonce satisfying 8 leading zero bits exists within budget");
        let mut mined = block;
        mined.set_nonce(nonce);
        assert!(mined.block_hash.leading_zero_bits_at_least(8));
    }
}
