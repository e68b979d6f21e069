//! Arena-backed "linked" transactions.
//!
//! The original Python carries cyclic references: a `LinkedTxnInput` holds a
//! direct pointer to the `LinkedTransaction` it spends from, so that looking
//! up the consumed coin doesn't need a second dictionary lookup. Rust can't
//! express that cycle through ownership, so predecessor transactions live in
//! a stable arena and a `LinkedTxnInput` holds a plain index into it instead
//! of a pointer.

use crate::hash::Hash;
use crate::model::{Transaction, TxnInput, TxnOutput};

/// A transaction input resolved to the arena slot of the transaction it
/// spends from, avoiding a second map lookup to find the consumed coin.
#[derive(Clone, Debug)]
pub struct LinkedTxnInput {
    pub txn_id: Hash,
    pub index: u32,
    pub txn_index: usize,
}

impl LinkedTxnInput {
    pub fn link(input: TxnInput, txn_index: usize) -> Self {
        LinkedTxnInput {
            txn_id: input.txn_id,
            index: input.index,
            txn_index,
        }
    }

    pub fn as_txn_input(&self) -> TxnInput {
        TxnInput::new(self.txn_id, self.index)
    }
}

/// A transaction whose inputs have been resolved against the chain's
/// transaction arena.
#[derive(Clone, Debug)]
pub struct LinkedTransaction {
    pub txn_id: Hash,
    pub inputs: Vec<LinkedTxnInput>,
    pub outputs: Vec<TxnOutput>,
}

impl LinkedTransaction {
    pub fn link(txn: Transaction, inputs: Vec<LinkedTxnInput>) -> Self {
        LinkedTransaction {
            txn_id: txn.txn_id,
            inputs,
            outputs: txn.outputs,
        }
    }

    pub fn to_transaction(&self) -> Transaction {
        Transaction {
            txn_id: self.txn_id,
            inputs: self.inputs.iter().map(LinkedTxnInput::as_txn_input).collect(),
            outputs: self.outputs.clone(),
        }
    }

    /// The coins consumed by this transaction's inputs, resolved via the
    /// arena. Panics if `arena` isn't the arena this transaction was linked
    /// against — a programmer error, never a data error.
    pub fn coin_inputs<'a>(&self, arena: &'a TransactionArena) -> Vec<&'a TxnOutput> {
        self.inputs
            .iter()
            .map(|input| {
                let predecessor = arena
                    .get(input.txn_index)
                    .expect("linked input points at a live arena slot");
                &predecessor.outputs[input.index as usize]
            })
            .collect()
    }
}

/// Append-only, tombstoning arena of `LinkedTransaction`s. Indices are
/// stable for the lifetime of the arena; a reverted transaction's slot
/// becomes `None` but is never reused, so indices handed out earlier never
/// dangle into an unrelated transaction.
#[derive(Clone, Debug, Default)]
pub struct TransactionArena {
    slots: Vec<Option<LinkedTransaction>>,
}

impl TransactionArena {
    pub fn new() -> Self {
        TransactionArena { slots: Vec::new() }
    }

    pub fn insert(&mut self, txn: LinkedTransaction) -> usize {
        let idx = self.slots.len();
        self.slots.push(Some(txn));
        idx
    }

    pub fn get(&self, idx: usize) -> Option<&LinkedTransaction> {
        self.slots.get(idx).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut LinkedTransaction> {
        self.slots.get_mut(idx).and_then(|slot| slot.as_mut())
    }

    pub fn remove(&mut self, idx: usize) -> Option<LinkedTransaction> {
        self.slots.get_mut(idx).and_then(|slot| slot.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::model::TxnOutput;

    #[test]
    fn arena_round_trip_and_tombstone() {
        let key = PrivateKey::generate();
        let mut txn = Transaction::unsigned(vec![], vec![TxnOutput::new(key.public_key(), 50)]);
        txn.sign(&key);
        let txn_id = txn.txn_id;

        let mut arena = TransactionArena::new();
        let idx = arena.insert(LinkedTransaction::link(txn, vec![]));
        assert_eq!(arena.get(idx).unwrap().txn_id, txn_id);

        let removed = arena.remove(idx).unwrap();
        assert_eq!(removed.txn_id, txn_id);
        assert!(arena.get(idx).is_none());
    }
}
