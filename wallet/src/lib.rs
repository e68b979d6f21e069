//! The wallet: UTXO selection, transfer construction with change, balance
//! computation, and pending-transfer tracking. Grounded in `wallet.py`.

use ndcoin_core::chain::ResolvedTxn;
use ndcoin_core::crypto::{PrivateKey, PublicKey};
use ndcoin_core::hash::Hash;
use ndcoin_core::model::{Transaction, TxnInput, TxnOutput};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One line of `wallet/pending-txns.txt`: `{txn_id, from, to, amount}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalTxn {
    pub txn_id: Hash,
    #[serde(serialize_with = "serialize_opt_pub_key", deserialize_with = "deserialize_opt_pub_key", rename = "from")]
    pub from_pub_key: Option<PublicKey>,
    #[serde(rename = "to")]
    pub to_pub_key: PublicKey,
    pub amount: u64,
}

fn serialize_opt_pub_key<S: Serializer>(key: &Option<PublicKey>, serializer: S) -> Result<S::Ok, S::Error> {
    match key {
        Some(k) => k.serialize(serializer),
        None => serializer.serialize_str(""),
    }
}

fn deserialize_opt_pub_key<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<PublicKey>, D::Error> {
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(None)
    } else {
        PublicKey::from_hex(&s).map(Some).ok_or_else(|| D::Error::custom("invalid public key hex"))
    }
}

impl LocalTxn {
    fn from_resolved(txn: &ResolvedTxn, receiver: PublicKey, amount: u64) -> Self {
        LocalTxn {
            txn_id: txn.txn_id,
            from_pub_key: txn.sender,
            to_pub_key: receiver,
            amount,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Balance {
    pub involved: Vec<LocalTxn>,
    pub total: u64,
}

pub struct Wallet {
    pub_key: PublicKey,
    priv_key: PrivateKey,
    pending_file: PathBuf,
    pending: Vec<LocalTxn>,
    /// The most recently loaded snapshot of transactions that pay `pub_key`.
    owned_transactions: Vec<ResolvedTxn>,
}

impl Wallet {
    pub fn new(pub_key: PublicKey, priv_key: PrivateKey, pending_file: PathBuf) -> io::Result<Self> {
        let pending = Self::read_pending_file(&pending_file)?;
        Ok(Wallet {
            pub_key,
            priv_key,
            pending_file,
            pending,
            owned_transactions: Vec::new(),
        })
    }

    fn read_pending_file(path: &Path) -> io::Result<Vec<LocalTxn>> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(contents
                .lines()
                .filter(|l| !l.trim().is_empty())
                .filter_map(|l| match serde_json::from_str(l) {
                    Ok(txn) => Some(txn),
                    Err(e) => {
                        debug!(error = %e, "skipping malformed pending-transfer line");
                        None
                    }
                })
                .collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn rewrite_pending_file(&self) -> io::Result<()> {
        if let Some(parent) = self.pending_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut body = String::new();
        for txn in &self.pending {
            body.push_str(&serde_json::to_string(txn)?);
            body.push('\n');
        }
        fs::write(&self.pending_file, body)
    }

    pub fn public_key(&self) -> PublicKey {
        self.pub_key
    }

    /// Scans `snapshot`, retaining only transactions with at least one
    /// unspent output paying this wallet, and reconciles the pending file
    /// against it (confirmed pending transfers are dropped).
    pub fn load_transactions(&mut self, snapshot: Vec<ResolvedTxn>) {
        // Pending entries are reconciled against the *whole* snapshot's ids,
        // not just the ones this wallet still owns outputs in — once a
        // transfer the wallet sent lands on-chain, it's confirmed whether
        // or not the wallet itself still owns any resulting output (e.g. a
        // transfer for its exact balance leaves no change output back to
        // self). Collect before `into_iter` consumes `snapshot`.
        let snapshot_ids: std::collections::HashSet<Hash> = snapshot.iter().map(|t| t.txn_id).collect();

        self.owned_transactions = snapshot
            .into_iter()
            .filter(|txn| txn.outputs.iter().any(|o| o.pub_key == self.pub_key && !o.spent))
            .collect();

        self.pending.retain(|p| !snapshot_ids.contains(&p.txn_id));

        if let Err(e) = self.rewrite_pending_file() {
            debug!(error = %e, "failed to rewrite pending-transfer file");
        }
    }

    /// Unspent outputs paying this wallet, accumulated in loaded order until
    /// `target` is reached. Empty on insufficient funds.
    fn find_coins(&self, target: u64) -> Vec<(Hash, u32, u64)> {
        let mut total = 0u64;
        let mut coins = Vec::new();

        for txn in &self.owned_transactions {
            for (i, coin) in txn.outputs.iter().enumerate() {
                if coin.pub_key != self.pub_key || coin.spent {
                    continue;
                }
                total += coin.amount;
                coins.push((txn.txn_id, i as u32, coin.amount));
                if total >= target {
                    return coins;
                }
            }
        }
        Vec::new()
    }

    /// Builds and signs a transfer of `amount` to `dest_pub_key`, with an
    /// optional change output back to self. Returns `None` on insufficient
    /// funds, with no side effects.
    pub fn create_txn(&self, dest_pub_key: PublicKey, amount: u64) -> Option<Transaction> {
        let coins = self.find_coins(amount);
        if coins.is_empty() {
            return None;
        }

        let total: u64 = coins.iter().map(|(_, _, amt)| amt).sum();
        let inputs = coins.iter().map(|(txn_id, index, _)| TxnInput::new(*txn_id, *index)).collect();

        let mut outputs = vec![TxnOutput::new(dest_pub_key, amount)];
        let change = total - amount;
        if change > 0 {
            outputs.push(TxnOutput::new(self.pub_key, change));
        }

        let mut txn = Transaction::unsigned(inputs, outputs);
        txn.sign(&self.priv_key);
        Some(txn)
    }

    /// Appends one line to the pending-transfer file.
    pub fn add_pending(&mut self, txn: &Transaction) {
        let local = LocalTxn {
            txn_id: txn.txn_id,
            from_pub_key: Some(self.pub_key),
            to_pub_key: txn.outputs[0].pub_key,
            amount: txn.outputs[0].amount,
        };
        self.pending.push(local.clone());

        if let Some(parent) = self.pending_file.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let result = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.pending_file)
            .and_then(|mut f| {
                use std::io::Write;
                writeln!(f, "{}", serde_json::to_string(&local)?)
            });
        if let Err(e) = result {
            debug!(error = %e, "failed to append pending transfer");
        }
    }

    pub fn pending_transfers(&self) -> &[LocalTxn] {
        &self.pending
    }

    /// `total` is the sum of unspent outputs paying this wallet;
    /// `involved` lists every transaction where the wallet appears as
    /// sender or recipient.
    pub fn get_balance(&self, snapshot: &[ResolvedTxn]) -> Balance {
        let mut involved = Vec::new();
        let mut total = 0u64;

        for txn in snapshot {
            let mut is_involved = false;
            let mut receiver = None;
            let mut amount = 0u64;

            if txn.sender == Some(self.pub_key) {
                is_involved = true;
            }

            for coin in &txn.outputs {
                if Some(coin.pub_key) != txn.sender {
                    receiver = Some(coin.pub_key);
                    amount = coin.amount;
                }
                if coin.pub_key == self.pub_key {
                    is_involved = true;
                    if !coin.spent {
                        total += coin.amount;
                    }
                }
            }

            if is_involved {
                involved.push(LocalTxn::from_resolved(txn, receiver.unwrap_or(self.pub_key), amount));
            }
        }

        Balance { involved, total }
    }
}
