//! End-to-end scenarios against the public chain/miner/wallet API,
//! covering the stale-work-interruption and serialization round-trip
//! cases that the engine-level unit tests don't exercise.

use ndcoin_core::chain::BlockChain;
use ndcoin_core::config::ChainConfig;
use ndcoin_core::crypto::PrivateKey;
use ndcoin_core::model::Block;
use ndcoin_core::Hash;
use ndcoin_miner::{Miner, Strategy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

fn test_config() -> ChainConfig {
    ChainConfig { mining_reward: 50, min_zeros: 8, max_blocks_behind: 10 }
}

fn genesis_chain(owner: &PrivateKey) -> BlockChain {
    let genesis = mine_block(owner, Hash::zero(), 0, vec![], test_config().min_zeros);
    BlockChain::with_genesis(genesis, std::env::temp_dir().join("ndcoin-node-test-unused"), test_config()).unwrap()
}

/// Mines a block paying `owner`'s own coinbase plus any `extra_txns`.
fn mine_block(
    owner: &PrivateKey,
    prev_hash: Hash,
    height: u32,
    extra_txns: Vec<ndcoin_core::model::Transaction>,
    min_zeros: u32,
) -> Block {
    let mut miner = Miner::new(owner.public_key(), owner.clone(), Strategy::Increment, 50);
    for txn in extra_txns {
        miner.add_pending_txn(txn);
    }
    let candidate = miner.compose_block(prev_hash, height);
    miner.first_nonce();
    loop {
        let nonce = miner.next_nonce().expect("search space not exhausted in test");
        if miner.valid_nonce(&candidate, nonce, min_zeros) {
            let mut block = candidate;
            block.set_nonce(nonce);
            return block;
        }
    }
}

#[test]
fn serialization_round_trip_preserves_hash() {
    let owner = PrivateKey::generate();
    let chain = genesis_chain(&owner);
    let block = chain.head().block.clone();

    let json = serde_json::to_string(&block).unwrap();
    let restored: Block = serde_json::from_str(&json).unwrap();

    assert_eq!(restored, block);
    assert_eq!(restored.compute_hash(restored.nonce), block.block_hash);
}

#[test]
fn stale_work_is_abandoned_within_one_iteration() {
    let owner = PrivateKey::generate();
    let chain = Arc::new(Mutex::new(genesis_chain(&owner)));

    // A competing block for height 1 lands on the chain from elsewhere.
    let head_hash = chain.lock().unwrap().head().block.block_hash;
    let rival = mine_block(&owner, head_hash, 1, vec![], test_config().min_zeros);
    assert_eq!(chain.lock().unwrap().insert_block(rival), ndcoin_core::chain::InsertResult::Inserted);

    // A miner starts a nonce search for the same prev_hash, using the
    // Random strategy so the search never terminates on its own.
    let chain_mod = Arc::new(AtomicBool::new(true));
    let mut miner = Miner::new(owner.public_key(), owner.clone(), Strategy::Random, 50);
    let candidate = miner.compose_block(head_hash, 1);

    let found = thread::spawn(move || {
        miner.first_nonce();
        loop {
            if chain_mod.load(Ordering::SeqCst) {
                return None;
            }
            let nonce = miner.next_nonce().unwrap();
            if miner.valid_nonce(&candidate, nonce, test_config().min_zeros) {
                return Some(nonce);
            }
        }
    })
    .join()
    .unwrap();

    assert!(found.is_none(), "search must abort on the first check once chain_mod is set");
}
