//! One miner's thread: snapshot the chain, absorb pending transactions,
//! search for a valid nonce, publish a mined block. Grounded in
//! `miner.py`'s `run_miner`/`accept_txns`/`find_nonce`.

use crossbeam_channel::{Receiver, Sender};
use ndcoin_core::chain::BlockChain;
use ndcoin_core::config::MinerConfig;
use ndcoin_core::model::{Block, Transaction};
use ndcoin_miner::Miner;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;

/// Streams transactions off `txns` into the miner's pending pool, verifying
/// each against a private snapshot of `chain` so a later pending transaction
/// may spend an earlier pending one's output. Returns `true` once ready to
/// mine, `false` if `chain_mod` fired underneath it (caller should re-snapshot).
fn accept_txns(
    miner: &mut Miner,
    snapshot: &mut BlockChain,
    txns: &Receiver<Transaction>,
    chain_mod: &AtomicBool,
    wait_timeout: Duration,
    max_txn_count: usize,
) -> bool {
    let deadline_base = Instant::now();
    let mut deadline = deadline_base + wait_timeout;

    loop {
        if chain_mod.load(Ordering::SeqCst) {
            return false;
        }
        if miner.num_pending_txns() >= max_txn_count {
            return true;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return miner.num_pending_txns() > 1;
        }

        match txns.recv_timeout(remaining.min(Duration::from_millis(100))) {
            Ok(txn) => {
                if snapshot.accept_pending_transaction(&txn) {
                    miner.add_pending_txn(txn);
                    if miner.num_pending_txns() == 2 {
                        deadline = Instant::now() + wait_timeout;
                    }
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                return miner.num_pending_txns() > 1;
            }
        }
    }
}

/// Searches for a nonce satisfying the chain's proof-of-work target,
/// checking `chain_mod` between attempts so a competing block aborts the
/// search early. Returns the mined block, or `None` if interrupted.
fn find_nonce(miner: &mut Miner, block: Block, min_zeros: u32, chain_mod: &AtomicBool) -> Option<Block> {
    miner.first_nonce();
    loop {
        if chain_mod.load(Ordering::SeqCst) {
            return None;
        }
        let nonce = miner.next_nonce()?;
        if miner.valid_nonce(&block, nonce, min_zeros) {
            let mut mined = block;
            mined.set_nonce(nonce);
            return Some(mined);
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    mut miner: Miner,
    chain: Arc<Mutex<BlockChain>>,
    miner_config: MinerConfig,
    txns: Receiver<Transaction>,
    blocks_out: Sender<Block>,
    outbound: Sender<serde_json::Value>,
    chain_mod: Arc<AtomicBool>,
    other_chain_mods: Vec<Arc<AtomicBool>>,
) {
    loop {
        chain_mod.swap(false, Ordering::SeqCst);
        let mut snapshot = chain.lock().unwrap().clone();
        let chain_config = snapshot.config();

        miner.reset_pending_txns();
        let ready = accept_txns(
            &mut miner,
            &mut snapshot,
            &txns,
            &chain_mod,
            Duration::from_secs(miner_config.wait_timeout_secs),
            miner_config.max_txn_count,
        );
        if !ready {
            continue;
        }

        let head = snapshot.head();
        let candidate = miner.compose_block(head.block.block_hash, head.block.height + 1);

        match find_nonce(&mut miner, candidate, chain_config.min_zeros, &chain_mod) {
            Some(mined) => {
                info!(hash = %mined.block_hash, height = mined.height, "mined block");
                let _ = blocks_out.send(mined.clone());
                let _ = outbound.send(mined.to_message());
                for flag in &other_chain_mods {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            None => continue,
        }
    }
}
