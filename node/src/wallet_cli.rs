//! The blocking wallet CLI: `send`/`balance`/`peers`/`pending`/`help`/`quit`.
//! Runs on the main thread, grounded in `node.py`'s `run_wallet`.

use crossbeam_channel::Sender;
use ndcoin_core::chain::BlockChain;
use ndcoin_core::crypto::PublicKey;
use ndcoin_core::model::Transaction;
use ndcoin_core::peer::Peer;
use ndcoin_wallet::Wallet;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};

const HELP: &str = "\
commands:
  send <dest_pub_hex> <amount>   sign and broadcast a transfer
  balance                        show confirmed balance and involved transfers
  peers                          list known peers
  pending                        list transfers awaiting confirmation
  help                           show this message
  quit                           exit";

pub fn run(
    mut wallet: Wallet,
    chain: Arc<Mutex<BlockChain>>,
    peers: Arc<Mutex<Vec<Peer>>>,
    miner_txn_queues: Vec<Sender<Transaction>>,
    outbound: Sender<serde_json::Value>,
) {
    println!("{HELP}\npublic key: {}", wallet.public_key().to_hex());

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let mut parts = line.trim().split_whitespace();
        let Some(command) = parts.next() else { continue };

        match command {
            "send" => {
                let (Some(dest_hex), Some(amount_str)) = (parts.next(), parts.next()) else {
                    println!("usage: send <dest_pub_hex> <amount>");
                    continue;
                };
                let Some(dest) = PublicKey::from_hex(dest_hex) else {
                    println!("invalid public key");
                    continue;
                };
                let Ok(amount) = amount_str.parse::<u64>() else {
                    println!("invalid amount");
                    continue;
                };

                let snapshot = chain.lock().unwrap().resolved_transactions();
                wallet.load_transactions(snapshot);
                match wallet.create_txn(dest, amount) {
                    Some(txn) => {
                        wallet.add_pending(&txn);
                        for sender in &miner_txn_queues {
                            let _ = sender.send(txn.clone());
                        }
                        let _ = outbound.send(txn.to_message());
                        println!("sent txn {}", txn.txn_id);
                    }
                    None => println!("insufficient funds"),
                }
            }
            "balance" => {
                let snapshot = chain.lock().unwrap().resolved_transactions();
                wallet.load_transactions(snapshot.clone());
                let balance = wallet.get_balance(&snapshot);
                println!("balance: {}", balance.total);
                for txn in &balance.involved {
                    println!(
                        "  {} from={} to={} amount={}",
                        txn.txn_id,
                        txn.from_pub_key.map(|k| k.to_hex()).unwrap_or_else(|| "coinbase".to_string()),
                        txn.to_pub_key.to_hex(),
                        txn.amount
                    );
                }
            }
            "peers" => {
                for peer in peers.lock().unwrap().iter() {
                    println!("  {} {}:{} ({})", peer.display_name, peer.address, peer.port, peer.pub_key.to_hex());
                }
            }
            "pending" => {
                for txn in wallet.pending_transfers() {
                    println!("  {} -> {} amount={}", txn.txn_id, txn.to_pub_key.to_hex(), txn.amount);
                }
            }
            "help" => println!("{HELP}"),
            "quit" => return,
            other => println!("unknown command: {other} (try 'help')"),
        }
        let _ = io::stdout().flush();
    }
}
