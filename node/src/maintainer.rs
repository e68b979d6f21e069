//! The chain maintainer: the only thread that writes to the shared chain.
//! Grounded in `node.py`'s `run_maintainer`.

use crossbeam_channel::Receiver;
use ndcoin_core::chain::{BlockChain, InsertResult};
use ndcoin_core::model::Block;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Drains `blocks`, tries to insert each into `chain`, persists accepted
/// blocks to disk, and flags every miner to restart on a new head.
pub fn run(chain: Arc<Mutex<BlockChain>>, blocks: Receiver<Block>, chain_mods: Vec<Arc<AtomicBool>>) {
    loop {
        let block = match blocks.recv_timeout(Duration::from_millis(200)) {
            Ok(block) => block,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
        };

        let block_hash = block.block_hash;
        let result = {
            let mut chain = chain.lock().unwrap();
            chain.insert_block(block.clone())
        };

        match result {
            InsertResult::Inserted => {
                if let Err(e) = chain.lock().unwrap().persist_block(&block) {
                    warn!(error = %e, hash = %block_hash, "failed to persist accepted block");
                }
                info!(hash = %block_hash, height = block.height, "accepted block");
                for flag in &chain_mods {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            InsertResult::Rejected => {
                debug!(hash = %block_hash, "rejected block");
            }
            InsertResult::MissingPredecessor => {
                debug!(hash = %block_hash, "block has no known predecessor, dropping");
            }
        }
    }
}
