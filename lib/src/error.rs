//! Error taxonomy for the chain engine.
//!
//! Only failures that a caller needs to branch on become `Result` variants.
//! Purely diagnostic failures (malformed wire messages, I/O hiccups) are
//! logged at the call site and folded into `None`/`bool`, matching the
//! "never throw past this boundary" behavior of the network and storage
//! code this crate was modeled on.

use crate::hash::Hash;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("block hash mismatch: computed {computed}, claimed {claimed}")]
    HashMismatch { computed: Hash, claimed: Hash },

    #[error("block hash does not satisfy proof-of-work")]
    ProofOfWorkFail,

    #[error("block has no transactions")]
    EmptyBlock,

    #[error("transaction {0} already present in chain")]
    DuplicateTransaction(Hash),

    #[error("transaction id does not match recomputed hash")]
    TxnIdMismatch,

    #[error("coinbase transaction is malformed")]
    InvalidCoinbase,

    #[error("referenced input transaction {0} is unknown")]
    UnknownInput(Hash),

    #[error("input index {index} out of range for transaction {txn_id}")]
    InputIndexOutOfRange { txn_id: Hash, index: u32 },

    #[error("inputs of a transaction must share one sender public key")]
    MixedSenders,

    #[error("referenced coin is already spent")]
    CoinAlreadySpent,

    #[error("output amount is negative")]
    NegativeAmount,

    #[error("sum of inputs does not equal sum of outputs")]
    AmountMismatch,

    #[error("signature verification failed")]
    BadSignature,

    #[error("block height is negative")]
    NegativeHeight,

    #[error("block predecessor is unknown")]
    MissingPredecessor,

    #[error("block is older than the reorg horizon")]
    TooOld,
}

pub type Result<T> = std::result::Result<T, CoreError>;
