//! Tunables collected into structs so they can be overridden (for
//! tests and for alternate deployments) instead of living as scattered
//! constants the way `rules.py` does.

use serde::{Deserialize, Serialize};

/// Coinbase reward, PoW difficulty, and chain-engine tunables.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainConfig {
    /// Coinbase output amount for a newly mined block.
    pub mining_reward: u64,
    /// Minimum leading zero bits a block hash must have.
    pub min_zeros: u32,
    /// How many blocks behind the head a predecessor may still be
    /// considered for insertion.
    pub max_blocks_behind: u32,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            mining_reward: 50,
            min_zeros: 16,
            max_blocks_behind: 10,
        }
    }
}

/// Miner-side tunables.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MinerConfig {
    /// Seconds to keep accepting transactions before mining with whatever
    /// is pending, provided at least one non-coinbase transaction arrived.
    pub wait_timeout_secs: u64,
    /// Maximum transactions (including the coinbase) per mined block.
    pub max_txn_count: usize,
}

impl Default for MinerConfig {
    fn default() -> Self {
        MinerConfig {
            wait_timeout_secs: 5,
            max_txn_count: 20,
        }
    }
}

/// Directory/catalog and wire-framing tunables.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    pub catalog_host: String,
    pub catalog_port: u16,
    /// Owner tag the node announces itself under in catalog beacons.
    pub owner: String,
    pub project: String,
    pub peer_type: String,
    pub beacon_interval_secs: u64,
    pub egress_poll_interval_ms: u64,
    pub read_deadline_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            catalog_host: "catalog.cse.nd.edu".to_string(),
            catalog_port: 9097,
            owner: "nd-coin-node".to_string(),
            project: "nd-coin".to_string(),
            peer_type: "crypto".to_string(),
            beacon_interval_secs: 60,
            egress_poll_interval_ms: 200,
            read_deadline_ms: 100,
        }
    }
}

/// Aggregates every tunable subsystem into one value constructible from CLI
/// flags or config-file overrides.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub chain: ChainConfig,
    pub miner: MinerConfig,
    pub network: NetworkConfig,
}
