//! Process entry point: parses arguments, loads keys and chain state, and
//! spawns the maintainer/network/miner threads before handing the main
//! thread to the wallet CLI. Grounded in `node.py`'s `main`.

mod cli;
mod keys;
mod maintainer;
mod miner_loop;
mod network;
mod wallet_cli;

use clap::Parser;
use crossbeam_channel::unbounded;
use ndcoin_core::chain::BlockChain;
use ndcoin_core::config::Config;
use ndcoin_core::model::{Block, Transaction};
use ndcoin_core::peer::Peer;
use ndcoin_miner::{Miner, Strategy};
use ndcoin_wallet::Wallet;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

/// Mines a genesis block paying `miner` if `<chain_dir>/0` does not already
/// exist. Runs single-threaded at startup, so no chain-modified check is
/// needed.
fn bootstrap_genesis(chain_dir: &std::path::Path, miner: &mut Miner, min_zeros: u32) -> std::io::Result<()> {
    if chain_dir.join("0").exists() {
        return Ok(());
    }
    info!("no genesis block on disk, mining one now");

    miner.reset_pending_txns();
    let candidate = miner.compose_block(ndcoin_core::Hash::zero(), 0);
    miner.first_nonce();
    let genesis = loop {
        let nonce = miner.next_nonce().expect("genesis mining does not exhaust the nonce space");
        if miner.valid_nonce(&candidate, nonce, min_zeros) {
            let mut block = candidate;
            block.set_nonce(nonce);
            break block;
        }
    };

    std::fs::create_dir_all(chain_dir)?;
    std::fs::write(chain_dir.join("0"), format!("{}\n", serde_json::to_string(&genesis)?))?;
    info!(hash = %genesis.block_hash, "mined genesis block");
    Ok(())
}

fn main() -> std::process::ExitCode {
    init_tracing();
    let cli = cli::Cli::parse();

    let mut config = Config::default();
    if let Some(host) = cli.catalog_host.clone() {
        config.network.catalog_host = host;
    }
    if let Some(port) = cli.catalog_port {
        config.network.catalog_port = port;
    }

    let node_keys = match keys::load_or_generate(&cli.keys_dir, cli.force_keygen) {
        Ok(k) => k,
        Err(e) => {
            warn!(error = %e, "could not load or generate node keys");
            return std::process::ExitCode::from(1);
        }
    };

    let mut bootstrap_miner =
        Miner::new(node_keys.public, node_keys.private.clone(), Strategy::Increment, config.chain.mining_reward);
    if let Err(e) = bootstrap_genesis(&cli.chain_dir, &mut bootstrap_miner, config.chain.min_zeros) {
        warn!(error = %e, "could not bootstrap genesis block");
        return std::process::ExitCode::from(1);
    }

    let chain = match BlockChain::load(cli.chain_dir.clone(), config.chain) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "could not load chain from disk");
            return std::process::ExitCode::from(1);
        }
    };
    info!(height = chain.head().block.height, "loaded chain");
    let chain = Arc::new(Mutex::new(chain));

    let wallet = match Wallet::new(node_keys.public, node_keys.private.clone(), cli.wallet_dir.join("pending-txns.txt")) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "could not open wallet pending-transfer file");
            return std::process::ExitCode::from(1);
        }
    };

    let (block_tx, block_rx) = unbounded::<Block>();
    let (outbound_tx, outbound_rx) = unbounded::<serde_json::Value>();
    let peers: Arc<Mutex<Vec<Peer>>> = Arc::new(Mutex::new(Vec::new()));

    let miner_count = cli.miners.max(1);
    let chain_mods: Vec<_> = (0..miner_count).map(|_| Arc::new(AtomicBool::new(false))).collect();

    // One txn queue per miner; ingress and the wallet CLI fan transactions
    // out to every one of them.
    let miner_txn_channels: Vec<_> = (0..miner_count).map(|_| unbounded::<Transaction>()).collect();
    let miner_txn_senders: Vec<_> = miner_txn_channels.iter().map(|(tx, _)| tx.clone()).collect();

    // Maintainer: sole chain writer.
    {
        let chain = Arc::clone(&chain);
        let chain_mods = chain_mods.clone();
        thread::spawn(move || maintainer::run(chain, block_rx, chain_mods));
    }

    // Egress: polls the outbound queue and fans out to known peers.
    {
        let network_config = config.network.clone();
        let my_pub_key = node_keys.public;
        let poll_interval = Duration::from_millis(network_config.egress_poll_interval_ms);
        thread::spawn(move || {
            let mut egress = network::Egress::new(network_config, my_pub_key);
            loop {
                match outbound_rx.recv_timeout(poll_interval) {
                    Ok(message) => egress.broadcast(&message),
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
                }
            }
        });
    }

    let ingress = match network::Ingress::bind(Duration::from_millis(config.network.read_deadline_ms)) {
        Ok(i) => i,
        Err(e) => {
            warn!(error = %e, "could not bind ingress listener");
            return std::process::ExitCode::from(1);
        }
    };
    let ingress_port = ingress.port;

    // Ingress: accepts one connection at a time, decodes one frame, and
    // routes it to the block queue or every miner's txn queue.
    {
        let block_tx = block_tx.clone();
        let miner_txn_senders = miner_txn_senders.clone();
        thread::spawn(move || loop {
            match ingress.accept_frame() {
                Some(network::Frame::Block(block)) => {
                    let _ = block_tx.send(block);
                }
                Some(network::Frame::BlockList(blocks)) => {
                    for block in blocks {
                        let _ = block_tx.send(block);
                    }
                }
                Some(network::Frame::Transaction(txn)) => {
                    for sender in &miner_txn_senders {
                        let _ = sender.send(txn.clone());
                    }
                }
                Some(network::Frame::BlockRequest) | None => {}
            }
        });
    }

    // Catalog beacon: best-effort UDP announcement, also used to refresh
    // the peer list the wallet CLI's `peers` command reads from.
    {
        let network_config = config.network.clone();
        let my_pub_key = node_keys.public;
        let display_name = cli.display_name.clone();
        let peers = Arc::clone(&peers);
        let interval = Duration::from_secs(network_config.beacon_interval_secs);
        thread::spawn(move || loop {
            if !network::send_catalog_update(&network_config, &my_pub_key, ingress_port, &display_name) {
                warn!("catalog beacon failed");
            }
            *peers.lock().unwrap() = network::find_peers(&network_config, &my_pub_key);
            thread::sleep(interval);
        });
    }

    // Miners.
    for (i, (_, txn_rx)) in miner_txn_channels.into_iter().enumerate() {
        let miner = Miner::new(node_keys.public, node_keys.private.clone(), Strategy::Random, config.chain.mining_reward);
        let chain = Arc::clone(&chain);
        let block_tx = block_tx.clone();
        let outbound_tx = outbound_tx.clone();
        let chain_mod = Arc::clone(&chain_mods[i]);
        let other_chain_mods: Vec<_> =
            chain_mods.iter().enumerate().filter(|(j, _)| *j != i).map(|(_, f)| Arc::clone(f)).collect();
        let miner_config = config.miner;

        thread::spawn(move || {
            miner_loop::run(miner, chain, miner_config, txn_rx, block_tx, outbound_tx, chain_mod, other_chain_mods)
        });
    }

    wallet_cli::run(wallet, chain, peers, miner_txn_senders, outbound_tx);
    std::process::ExitCode::SUCCESS
}
