use clap::Parser;
use std::path::PathBuf;

/// A peer-to-peer proof-of-work coin node: chain maintainer, miner pool,
/// and wallet CLI in one process.
#[derive(Parser, Debug)]
#[command(name = "ndcoin-node", version, about)]
pub struct Cli {
    /// Name this node announces itself under on the network.
    pub display_name: String,

    /// Number of miner threads to run.
    #[arg(short = 'm', long = "miners", default_value_t = 1)]
    pub miners: usize,

    /// Directory block files are read from and appended to.
    #[arg(long, default_value = "chain", env = "NDCOIN_CHAIN_DIR")]
    pub chain_dir: PathBuf,

    /// Directory the node's ECDSA key pair lives in.
    #[arg(long, default_value = ".keys", env = "NDCOIN_KEYS_DIR")]
    pub keys_dir: PathBuf,

    /// Overwrite an existing key pair instead of loading it.
    #[arg(short = 'f', long = "force-keygen")]
    pub force_keygen: bool,

    /// Directory the wallet's pending-transfer file lives in.
    #[arg(long, default_value = "wallet", env = "NDCOIN_WALLET_DIR")]
    pub wallet_dir: PathBuf,

    /// Catalog server host, overriding the compiled-in default.
    #[arg(long, env = "NDCOIN_CATALOG_HOST")]
    pub catalog_host: Option<String>,

    /// Catalog server port, overriding the compiled-in default.
    #[arg(long, env = "NDCOIN_CATALOG_PORT")]
    pub catalog_port: Option<u16>,
}
