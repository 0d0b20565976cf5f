use std::collections::HashMap;

use crate::transaction::Transaction;

/// Transactions heard from peers but not yet included in a block.
#[derive(Debug, Default)]
pub struct Mempool {
    txs: HashMap<String, Transaction>,
}

impl Mempool {
    pub fn new() -> Mempool {
        Mempool {
            txs: HashMap::new(),
        }
    }

    pub fn insert(&mut self, tx: Transaction) {
        self.txs.insert(tx.id.clone(), tx);
    }

    pub fn get(&self, txid: &str) -> Option<&Transaction> {
        self.txs.get(txid)
    }

    pub fn contains(&self, txid: &str) -> bool {
        self.txs.contains_key(txid)
    }

    pub fn remove(&mut self, txid: &str) {
        self.txs.remove(txid);
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Snapshot of the pending transactions, in no particular order.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.txs.values().cloned().collect()
    }
}
