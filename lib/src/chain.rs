//! The chain engine: a multi-branch tree of blocks, head selection, reorg
//! via lowest-common-ancestor revert/apply, and transaction/coin
//! bookkeeping. This is the hard part of the system.

use crate::config::ChainConfig;
use crate::error::{CoreError, Result};
use crate::hash::Hash;
use crate::linked::{LinkedTransaction, LinkedTxnInput, TransactionArena};
use crate::model::{Block, Transaction, TxnOutput};
use crate::crypto::PublicKey;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    Inserted,
    Rejected,
    MissingPredecessor,
}

/// A transaction with its sender resolved — `None` only for a coinbase,
/// whose reward has no paying party. Mirrors `LocalTxn.from_linked_txn`'s
/// use of `coin_inputs()` to identify who signed for a transfer.
#[derive(Clone, Debug)]
pub struct ResolvedTxn {
    pub txn_id: Hash,
    pub sender: Option<PublicKey>,
    pub outputs: Vec<TxnOutput>,
}

/// A block attached to the chain, with a back-pointer to its predecessor
/// node rather than to the predecessor block directly.
#[derive(Clone, Debug)]
pub struct ChainNode {
    pub parent: Option<usize>,
    pub block: Block,
}

/// A multi-branch proof-of-work chain. Cheaply `Clone`-able so that miners
/// and the wallet can take a deep-copy snapshot under the chain mutex and
/// reason about it without blocking the writer.
#[derive(Clone)]
pub struct BlockChain {
    storage_dir: PathBuf,
    config: ChainConfig,
    nodes: Vec<ChainNode>,
    /// height -> (block_hash -> node index)
    levels: Vec<HashMap<Hash, usize>>,
    head: usize,
    max_height: u32,
    txn_arena: TransactionArena,
    /// txn_id -> arena index, valid only for transactions applied on the
    /// branch ending at `head`.
    transactions: HashMap<Hash, usize>,
}

impl BlockChain {
    /// Loads height 0 from `storage_dir` as genesis, then heights 1, 2, …
    /// best-effort until the first missing file.
    pub fn load(storage_dir: PathBuf, config: ChainConfig) -> io::Result<Self> {
        let genesis_blocks = Self::read_block_file(&storage_dir, 0)?;
        if genesis_blocks.len() != 1 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "genesis file must contain exactly one block",
            ));
        }
        let mut chain = Self::with_genesis(genesis_blocks.into_iter().next().unwrap(), storage_dir, config)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        let mut height = 1u32;
        loop {
            let blocks = match Self::read_block_file(&chain.storage_dir, height) {
                Ok(blocks) => blocks,
                Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                Err(e) => return Err(e),
            };
            for block in blocks {
                match chain.insert_block(block.clone()) {
                    InsertResult::Inserted => {}
                    other => {
                        warn!(height, hash = %block.block_hash, ?other, "discarding malformed block on load");
                    }
                }
            }
            height += 1;
        }

        Ok(chain)
    }

    fn read_block_file(storage_dir: &Path, height: u32) -> io::Result<Vec<Block>> {
        let path = storage_dir.join(height.to_string());
        let contents = fs::read_to_string(path)?;
        let mut blocks = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Block>(line) {
                Ok(block) => blocks.push(block),
                Err(e) => debug!(error = %e, "skipping invalid block line"),
            }
        }
        Ok(blocks)
    }

    /// Builds a fresh chain from an in-memory genesis block, without
    /// touching disk (used by tests and `load`).
    pub fn with_genesis(genesis: Block, storage_dir: PathBuf, config: ChainConfig) -> Result<Self> {
        let mut chain = BlockChain {
            storage_dir,
            config,
            nodes: Vec::new(),
            levels: vec![HashMap::new()],
            head: 0,
            max_height: 0,
            txn_arena: TransactionArena::new(),
            transactions: HashMap::new(),
        };

        if genesis.height != 0 {
            return Err(CoreError::NegativeHeight);
        }
        let computed = genesis.compute_hash(genesis.nonce);
        if computed != genesis.block_hash {
            return Err(CoreError::HashMismatch {
                computed,
                claimed: genesis.block_hash,
            });
        }
        if !computed.leading_zero_bits_at_least(chain.config.min_zeros) {
            return Err(CoreError::ProofOfWorkFail);
        }
        if genesis.transactions.is_empty() {
            return Err(CoreError::EmptyBlock);
        }
        for (i, txn) in genesis.transactions.iter().enumerate() {
            let coinbase_ctx = if i == 0 { Some((genesis.prev_hash, genesis.height)) } else { None };
            chain.verify_transaction_detailed(txn, coinbase_ctx)?;
            chain.apply_transaction(txn.clone());
        }

        chain.nodes.push(ChainNode { parent: None, block: genesis.clone() });
        chain.levels[0].insert(genesis.block_hash, 0);
        chain.head = 0;
        chain.max_height = 0;

        Ok(chain)
    }

    pub fn head(&self) -> &ChainNode {
        &self.nodes[self.head]
    }

    pub fn config(&self) -> ChainConfig {
        self.config
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn get_transaction(&self, txn_id: &Hash) -> Option<&LinkedTransaction> {
        self.transactions.get(txn_id).and_then(|&idx| self.txn_arena.get(idx))
    }

    pub fn transaction_ids(&self) -> impl Iterator<Item = &Hash> {
        self.transactions.keys()
    }

    /// All transactions currently applied on the branch ending at `head`.
    pub fn transactions(&self) -> Vec<LinkedTransaction> {
        self.transactions
            .values()
            .filter_map(|&idx| self.txn_arena.get(idx).cloned())
            .collect()
    }

    /// The applied transaction set with senders resolved, for callers (the
    /// wallet, in particular) that need to know who paid whom without
    /// reaching into the arena themselves.
    pub fn resolved_transactions(&self) -> Vec<ResolvedTxn> {
        self.transactions
            .values()
            .filter_map(|&idx| {
                let txn = self.txn_arena.get(idx)?;
                let sender = txn.coin_inputs(&self.txn_arena).first().map(|coin| coin.pub_key);
                Some(ResolvedTxn {
                    txn_id: txn.txn_id,
                    sender,
                    outputs: txn.outputs.clone(),
                })
            })
            .collect()
    }

    /// Appends `block`'s canonical JSON as one line to `chain/<height>`.
    pub fn persist_block(&self, block: &Block) -> io::Result<()> {
        fs::create_dir_all(&self.storage_dir)?;
        let path = self.storage_dir.join(block.height.to_string());
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(block)?;
        writeln!(file, "{line}")
    }

    fn height_of(&self, idx: usize) -> u32 {
        self.nodes[idx].block.height
    }

    fn parent_of(&self, idx: usize) -> Option<usize> {
        self.nodes[idx].parent
    }

    fn block_hash_of(&self, idx: usize) -> Hash {
        self.nodes[idx].block.block_hash
    }

    fn find_predecessor(&self, block: &Block) -> Option<usize> {
        if block.height == 0 {
            return None;
        }
        self.levels
            .get((block.height - 1) as usize)
            .and_then(|level| level.get(&block.prev_hash).copied())
    }

    fn block_already_present(&self, block: &Block) -> bool {
        self.levels
            .get(block.height as usize)
            .map(|level| level.contains_key(&block.block_hash))
            .unwrap_or(false)
    }

    fn too_old(&self, height: u32) -> bool {
        let head_height = self.height_of(self.head) as i64;
        (head_height - height as i64) > self.config.max_blocks_behind as i64
    }

    /// `insert_block` — the tri-state insert contract.
    pub fn insert_block(&mut self, block: Block) -> InsertResult {
        if self.block_already_present(&block) {
            // Idempotent: already in the chain, nothing to do.
            return InsertResult::Inserted;
        }

        if self.too_old(block.height) {
            debug!(height = block.height, "rejecting block: older than reorg horizon");
            return InsertResult::Rejected;
        }

        let prev_idx = match self.find_predecessor(&block) {
            Some(idx) => idx,
            None => return InsertResult::MissingPredecessor,
        };

        let original_head = self.head;
        self.move_head(original_head, prev_idx);

        match self.verify_and_apply_block(&block) {
            Ok(()) => {
                let new_idx = self.nodes.len();
                self.nodes.push(ChainNode { parent: Some(prev_idx), block: block.clone() });
                while self.levels.len() <= block.height as usize {
                    self.levels.push(HashMap::new());
                }
                self.levels[block.height as usize].insert(block.block_hash, new_idx);

                if block.height > self.max_height {
                    self.max_height = block.height;
                    self.head = new_idx;
                } else {
                    for txn in block.transactions.iter().rev() {
                        self.revert_transaction(&txn.txn_id);
                    }
                    self.move_head(prev_idx, original_head);
                    self.head = original_head;
                }
                InsertResult::Inserted
            }
            Err(e) => {
                debug!(error = %e, hash = %block.block_hash, "rejecting invalid block");
                self.move_head(prev_idx, original_head);
                self.head = original_head;
                InsertResult::Rejected
            }
        }
    }

    /// The lowest-common-ancestor reorg: realigns applied transaction state
    /// from the branch ending at `src` to the branch ending at `dst`.
    fn move_head(&mut self, src: usize, dst: usize) {
        if src == dst {
            return;
        }

        let mut s = src;
        let mut d = dst;

        while self.height_of(s) > self.height_of(d) {
            self.revert_node(s);
            s = self.parent_of(s).expect("fatal invariant violation: stepped past genesis aligning heights");
        }

        let mut to_apply = Vec::new();
        while self.height_of(d) > self.height_of(s) {
            to_apply.push(d);
            d = self.parent_of(d).expect("fatal invariant violation: stepped past genesis aligning heights");
        }

        while self.block_hash_of(s) != self.block_hash_of(d) {
            self.revert_node(s);
            to_apply.push(d);
            s = self.parent_of(s).expect("fatal invariant violation: LCA search stepped past genesis");
            d = self.parent_of(d).expect("fatal invariant violation: LCA search stepped past genesis");
        }

        for idx in to_apply.into_iter().rev() {
            self.apply_node(idx);
        }
    }

    fn revert_node(&mut self, idx: usize) {
        let block = self.nodes[idx].block.clone();
        for txn in block.transactions.iter().rev() {
            self.revert_transaction(&txn.txn_id);
        }
    }

    fn apply_node(&mut self, idx: usize) {
        let block = self.nodes[idx].block.clone();
        for txn in block.transactions.into_iter() {
            self.apply_transaction(txn);
        }
    }

    /// Verifies `block` against the chain's current state, applying each
    /// transaction as it passes so later transactions in the same block may
    /// reference earlier ones' outputs. Reverts everything it applied, in
    /// reverse order, before returning an error.
    fn verify_and_apply_block(&mut self, block: &Block) -> Result<()> {
        let computed = block.compute_hash(block.nonce);
        if computed != block.block_hash {
            return Err(CoreError::HashMismatch { computed, claimed: block.block_hash });
        }
        if !computed.leading_zero_bits_at_least(self.config.min_zeros) {
            return Err(CoreError::ProofOfWorkFail);
        }
        if block.transactions.is_empty() {
            return Err(CoreError::EmptyBlock);
        }

        for (i, txn) in block.transactions.iter().enumerate() {
            let coinbase_ctx = if i == 0 { Some((block.prev_hash, block.height)) } else { None };
            if let Err(e) = self.verify_transaction_detailed(txn, coinbase_ctx) {
                for undo in block.transactions[..i].iter().rev() {
                    self.revert_transaction(&undo.txn_id);
                }
                return Err(e);
            }
            self.apply_transaction(txn.clone());
        }

        Ok(())
    }

    /// Public contract: checks well-formedness and invariants (3,5,6,7)
    /// against current chain state, for an ordinary (non-coinbase) transaction.
    pub fn verify_transaction(&self, txn: &Transaction) -> bool {
        self.verify_transaction_detailed(txn, None).is_ok()
    }

    /// Verifies `txn` and, if valid, applies it to this chain. Used by a
    /// miner building a candidate block so that a later pending transaction
    /// may spend an earlier pending one's output before either is mined.
    pub fn accept_pending_transaction(&mut self, txn: &Transaction) -> bool {
        if self.verify_transaction_detailed(txn, None).is_ok() {
            self.apply_transaction(txn.clone());
            true
        } else {
            false
        }
    }

    /// `coinbase_ctx` is `Some((prev_hash, height))` of the block `txn` is
    /// the first transaction of, `None` for an ordinary transfer.
    fn verify_transaction_detailed(&self, txn: &Transaction, coinbase_ctx: Option<(Hash, u32)>) -> Result<()> {
        if self.transactions.contains_key(&txn.txn_id) {
            return Err(CoreError::DuplicateTransaction(txn.txn_id));
        }
        if txn.txn_id != txn.compute_txn_id() {
            return Err(CoreError::TxnIdMismatch);
        }

        if let Some((prev_hash, height)) = coinbase_ctx {
            if !txn.inputs.is_empty() || txn.outputs.len() != 1 {
                return Err(CoreError::InvalidCoinbase);
            }
            if txn.outputs[0].amount != self.config.mining_reward {
                return Err(CoreError::InvalidCoinbase);
            }
            if !txn.verify_signature_coinbase(&txn.outputs[0].pub_key, prev_hash, height) {
                return Err(CoreError::BadSignature);
            }
            return Ok(());
        }

        let mut sender = None;
        let mut in_tot: u64 = 0;
        for input in &txn.inputs {
            let pred_idx = *self
                .transactions
                .get(&input.txn_id)
                .ok_or(CoreError::UnknownInput(input.txn_id))?;
            let predecessor = self
                .txn_arena
                .get(pred_idx)
                .expect("transactions map always points at a live arena slot");

            let prev_coin = predecessor
                .outputs
                .get(input.index as usize)
                .ok_or(CoreError::InputIndexOutOfRange { txn_id: input.txn_id, index: input.index })?;

            match sender {
                None => sender = Some(prev_coin.pub_key),
                Some(s) if s == prev_coin.pub_key => {}
                Some(_) => return Err(CoreError::MixedSenders),
            }

            if prev_coin.spent {
                return Err(CoreError::CoinAlreadySpent);
            }

            in_tot += prev_coin.amount;
        }
        let sender_pub_key = sender.ok_or(CoreError::InvalidCoinbase)?;

        let out_tot: u64 = txn.outputs.iter().map(|o| o.amount).sum();
        if in_tot != out_tot {
            return Err(CoreError::AmountMismatch);
        }

        if !txn.verify_signature(&sender_pub_key) {
            return Err(CoreError::BadSignature);
        }

        Ok(())
    }

    fn apply_transaction(&mut self, txn: Transaction) {
        let mut linked_inputs = Vec::with_capacity(txn.inputs.len());
        for input in &txn.inputs {
            let txn_index = *self
                .transactions
                .get(&input.txn_id)
                .expect("apply_transaction called only after verify_transaction_detailed succeeded");
            if let Some(predecessor) = self.txn_arena.get_mut(txn_index) {
                predecessor.outputs[input.index as usize].spent = true;
            }
            linked_inputs.push(LinkedTxnInput::link(*input, txn_index));
        }

        let txn_id = txn.txn_id;
        let linked = LinkedTransaction::link(txn, linked_inputs);
        let idx = self.txn_arena.insert(linked);
        self.transactions.insert(txn_id, idx);
    }

    fn revert_transaction(&mut self, txn_id: &Hash) {
        let Some(idx) = self.transactions.remove(txn_id) else {
            return;
        };
        if let Some(removed) = self.txn_arena.remove(idx) {
            for input in &removed.inputs {
                if let Some(predecessor) = self.txn_arena.get_mut(input.txn_index) {
                    predecessor.outputs[input.index as usize].spent = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::model::{Transaction, TxnInput, TxnOutput};
    use crate::U256;

    fn mine(mut block: Block, min_zeros: u32) -> Block {
        let mut nonce = U256::zero();
        loop {
            let h = block.compute_hash(nonce);
            if h.leading_zero_bits_at_least(min_zeros) {
                block.set_nonce(nonce);
                return block;
            }
            nonce = nonce + U256::from(1u64);
        }
    }

    fn coinbase(key: &PrivateKey, reward: u64, prev_hash: Hash, height: u32) -> Transaction {
        let mut txn = Transaction::unsigned(vec![], vec![TxnOutput::new(key.public_key(), reward)]);
        txn.sign_coinbase(key, prev_hash, height);
        txn
    }

    fn genesis(key: &PrivateKey, config: ChainConfig) -> Block {
        let txn = coinbase(key, config.mining_reward, Hash::zero(), 0);
        let block = Block::compose(Hash::zero(), 0, vec![txn]);
        mine(block, config.min_zeros)
    }

    fn test_config() -> ChainConfig {
        ChainConfig { mining_reward: 50, min_zeros: 8, max_blocks_behind: 10 }
    }

    fn chain_with_genesis(key: &PrivateKey) -> BlockChain {
        let config = test_config();
        let g = genesis(key, config);
        BlockChain::with_genesis(g, PathBuf::from("/tmp/does-not-matter"), config).unwrap()
    }

    #[test]
    fn genesis_only_balance() {
        let key = PrivateKey::generate();
        let chain = chain_with_genesis(&key);
        let total: u64 = chain
            .transactions()
            .iter()
            .flat_map(|t| t.outputs.iter())
            .filter(|o| o.pub_key == key.public_key() && !o.spent)
            .map(|o| o.amount)
            .sum();
        assert_eq!(total, 50);
    }

    #[test]
    fn simple_transfer_and_reject_double_spend() {
        let miner_key = PrivateKey::generate();
        let dest_key = PrivateKey::generate();
        let mut chain = chain_with_genesis(&miner_key);

        let genesis_coinbase_id = chain.head().block.transactions[0].txn_id;

        let mut transfer = Transaction::unsigned(
            vec![TxnInput::new(genesis_coinbase_id, 0)],
            vec![
                TxnOutput::new(dest_key.public_key(), 40),
                TxnOutput::new(miner_key.public_key(), 10),
            ],
        );
        transfer.sign(&miner_key);

        assert!(chain.verify_transaction(&transfer));

        let next_coinbase = coinbase(&miner_key, 50, chain.head().block.block_hash, 1);
        let block1 = mine(
            Block::compose(chain.head().block.block_hash, 1, vec![next_coinbase, transfer.clone()]),
            test_config().min_zeros,
        );

        assert_eq!(chain.insert_block(block1), InsertResult::Inserted);

        let miner_balance: u64 = chain
            .transactions()
            .iter()
            .flat_map(|t| t.outputs.iter())
            .filter(|o| o.pub_key == miner_key.public_key() && !o.spent)
            .map(|o| o.amount)
            .sum();
        assert_eq!(miner_balance, 60);

        // Double-spend: same coin consumed again by a second transaction.
        let mut double_spend = Transaction::unsigned(
            vec![TxnInput::new(genesis_coinbase_id, 0)],
            vec![TxnOutput::new(dest_key.public_key(), 40)],
        );
        double_spend.sign(&miner_key);
        assert!(!chain.verify_transaction(&double_spend));
    }

    /// A miner's coinbase payload is otherwise constant for a fixed key, so
    /// deterministic ECDSA signing would make every block it mines collide
    /// on `txn_id` with its first. `sign_coinbase` must bind each coinbase
    /// to its own block so consecutive blocks from one miner are accepted.
    #[test]
    fn consecutive_blocks_from_same_miner_are_accepted() {
        let miner_key = PrivateKey::generate();
        let mut chain = chain_with_genesis(&miner_key);
        let config = test_config();

        let mut head_hash = chain.head().block.block_hash;
        for height in 1..=3u32 {
            let block = mine(
                Block::compose(head_hash, height, vec![coinbase(&miner_key, config.mining_reward, head_hash, height)]),
                config.min_zeros,
            );
            assert_eq!(chain.insert_block(block.clone()), InsertResult::Inserted);
            head_hash = block.block_hash;
        }

        let miner_balance: u64 = chain
            .transactions()
            .iter()
            .flat_map(|t| t.outputs.iter())
            .filter(|o| o.pub_key == miner_key.public_key() && !o.spent)
            .map(|o| o.amount)
            .sum();
        assert_eq!(miner_balance, 4 * config.mining_reward);
    }

    #[test]
    fn reorg_prefers_taller_branch() {
        let miner_key = PrivateKey::generate();
        let mut chain = chain_with_genesis(&miner_key);
        let config = test_config();

        let block_a1 = mine(
            Block::compose(
                chain.head().block.block_hash,
                1,
                vec![coinbase(&miner_key, config.mining_reward, chain.head().block.block_hash, 1)],
            ),
            config.min_zeros,
        );
        assert_eq!(chain.insert_block(block_a1.clone()), InsertResult::Inserted);
        assert_eq!(chain.head().block.block_hash, block_a1.block_hash);

        let block_a2 = mine(
            Block::compose(
                block_a1.block_hash,
                2,
                vec![coinbase(&miner_key, config.mining_reward, block_a1.block_hash, 2)],
            ),
            config.min_zeros,
        );
        assert_eq!(chain.insert_block(block_a2.clone()), InsertResult::Inserted);
        assert_eq!(chain.head().block.block_hash, block_a2.block_hash);

        // Alternative branch off genesis, eventually taller.
        let block_b1 = mine(
            Block::compose(
                chain.nodes[0].block.block_hash,
                1,
                vec![coinbase(&miner_key, config.mining_reward, chain.nodes[0].block.block_hash, 1)],
            ),
            config.min_zeros,
        );
        assert_eq!(chain.insert_block(block_b1.clone()), InsertResult::Inserted);
        assert_eq!(chain.head().block.block_hash, block_a2.block_hash, "shorter branch must not become head");

        let block_b2 = mine(
            Block::compose(
                block_b1.block_hash,
                2,
                vec![coinbase(&miner_key, config.mining_reward, block_b1.block_hash, 2)],
            ),
            config.min_zeros,
        );
        assert_eq!(chain.insert_block(block_b2.clone()), InsertResult::Inserted);
        assert_eq!(chain.head().block.block_hash, block_a2.block_hash, "tie must not move head");

        let block_b3 = mine(
            Block::compose(
                block_b2.block_hash,
                3,
                vec![coinbase(&miner_key, config.mining_reward, block_b2.block_hash, 3)],
            ),
            config.min_zeros,
        );
        assert_eq!(chain.insert_block(block_b3.clone()), InsertResult::Inserted);
        assert_eq!(chain.head().block.block_hash, block_b3.block_hash, "taller branch must become head");

        // The a-branch's coinbase outputs should no longer be part of the
        // applied transaction set.
        assert!(chain.get_transaction(&block_a1.transactions[0].txn_id).is_none());
        assert!(chain.get_transaction(&block_a2.transactions[0].txn_id).is_none());
        assert!(chain.get_transaction(&block_b1.transactions[0].txn_id).is_some());
    }

    #[test]
    fn insert_duplicate_block_is_idempotent() {
        let miner_key = PrivateKey::generate();
        let mut chain = chain_with_genesis(&miner_key);
        let config = test_config();
        let block1 = mine(
            Block::compose(
                chain.head().block.block_hash,
                1,
                vec![coinbase(&miner_key, config.mining_reward, chain.head().block.block_hash, 1)],
            ),
            config.min_zeros,
        );
        assert_eq!(chain.insert_block(block1.clone()), InsertResult::Inserted);
        assert_eq!(chain.insert_block(block1), InsertResult::Inserted);
    }

    #[test]
    fn missing_predecessor_is_reported() {
        let miner_key = PrivateKey::generate();
        let mut chain = chain_with_genesis(&miner_key);
        let config = test_config();
        let orphan = mine(
            Block::compose(
                Hash::of(b"nonexistent"),
                5,
                vec![coinbase(&miner_key, config.mining_reward, Hash::of(b"nonexistent"), 5)],
            ),
            config.min_zeros,
        );
        assert_eq!(chain.insert_block(orphan), InsertResult::MissingPredecessor);
    }
}
