use std::collections::HashMap;

use log::info;
use sled::Tree;

use crate::block::Block;
use crate::blockchain::Blockchain;
use crate::errors::Result;
use crate::tx::TXOutputs;

const UTXO_TREE: &str = "chainstate";

/// Derived index over the chain: `txid -> unspent outputs`. Lets balance and
/// spend queries avoid a full chain scan.
pub struct UTXOSet {
    pub blockchain: Blockchain,
}

impl UTXOSet {
    fn tree(&self) -> Result<Tree> {
        Ok(self.blockchain.db().open_tree(UTXO_TREE)?)
    }

    /// Rebuilds the whole index from a full chain scan. The fresh mapping is
    /// applied as one atomic batch.
    pub fn reindex(&self) -> Result<()> {
        let tree = self.tree()?;
        tree.clear()?;

        let utxos = self.blockchain.find_utxo()?;
        let mut batch = sled::Batch::default();
        for (txid, outs) in utxos {
            batch.insert(txid.as_bytes(), bincode::serialize(&outs)?);
        }
        tree.apply_batch(batch)?;
        info!("reindexed the UTXO set");
        Ok(())
    }

    /// Folds one mined block into the index: consumed outputs disappear
    /// (dropping exhausted transactions entirely), new outputs appear.
    pub fn update(&self, block: &Block) -> Result<()> {
        let tree = self.tree()?;
        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for vin in &tx.vin {
                    let mut updated = TXOutputs {
                        outputs: Vec::new(),
                    };
                    let data = tree
                        .get(vin.txid.as_bytes())?
                        .ok_or_else(|| crate::errors::ChainError::TxNotFound {
                            txid: vin.txid.clone(),
                        })?;
                    let outs: TXOutputs = bincode::deserialize(&data)?;
                    for (out_idx, out) in outs.outputs.iter().enumerate() {
                        if out_idx != vin.vout as usize {
                            updated.outputs.push(out.clone());
                        }
                    }
                    if updated.outputs.is_empty() {
                        tree.remove(vin.txid.as_bytes())?;
                    } else {
                        tree.insert(vin.txid.as_bytes(), bincode::serialize(&updated)?)?;
                    }
                }
            }

            let new_outputs = TXOutputs {
                outputs: tx.vout.clone(),
            };
            tree.insert(tx.id.as_bytes(), bincode::serialize(&new_outputs)?)?;
        }
        Ok(())
    }

    /// Greedy coin selection in the store's key order; stops as soon as
    /// `amount` is covered.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: i32,
    ) -> Result<(i32, HashMap<String, Vec<i32>>)> {
        let mut unspent_outputs: HashMap<String, Vec<i32>> = HashMap::new();
        let mut accumulated = 0;

        let tree = self.tree()?;
        for item in tree.iter() {
            let (k, v) = item?;
            let txid = String::from_utf8(k.to_vec())?;
            let outs: TXOutputs = bincode::deserialize(&v)?;
            for (out_idx, out) in outs.outputs.iter().enumerate() {
                if out.is_locked_with_key(pub_key_hash) && accumulated < amount {
                    accumulated += out.value;
                    unspent_outputs
                        .entry(txid.clone())
                        .or_default()
                        .push(out_idx as i32);
                }
            }
        }
        Ok((accumulated, unspent_outputs))
    }

    /// Every unspent output locked to `pub_key_hash`.
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<TXOutputs> {
        let mut utxos = TXOutputs {
            outputs: Vec::new(),
        };
        let tree = self.tree()?;
        for item in tree.iter() {
            let (_, v) = item?;
            let outs: TXOutputs = bincode::deserialize(&v)?;
            for out in outs.outputs {
                if out.is_locked_with_key(pub_key_hash) {
                    utxos.outputs.push(out);
                }
            }
        }
        Ok(utxos)
    }

    pub fn count_transactions(&self) -> Result<i32> {
        let mut counter = 0;
        for item in self.tree()?.iter() {
            item?;
            counter += 1;
        }
        Ok(counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DATA_DIR, SUBSIDY};
    use crate::transaction::Transaction;
    use crate::wallet::{hash_pub_key, Wallet};
    use std::collections::BTreeMap;
    use std::fs;

    fn fresh_utxo(node_id: &str) -> (UTXOSet, Wallet) {
        let _ = fs::remove_dir_all(format!("{}/blocks_{}", DATA_DIR, node_id));
        let wallet = Wallet::new();
        let bc = Blockchain::create_blockchain(&wallet.get_address(), node_id).unwrap();
        let utxo = UTXOSet { blockchain: bc };
        utxo.reindex().unwrap();
        (utxo, wallet)
    }

    fn cleanup(node_id: &str) {
        let _ = fs::remove_dir_all(format!("{}/blocks_{}", DATA_DIR, node_id));
    }

    fn snapshot(utxo: &UTXOSet) -> BTreeMap<String, TXOutputs> {
        let mut map = BTreeMap::new();
        for item in utxo.tree().unwrap().iter() {
            let (k, v) = item.unwrap();
            map.insert(
                String::from_utf8(k.to_vec()).unwrap(),
                bincode::deserialize::<TXOutputs>(&v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_reindex_counts_genesis() {
        let node_id = "utxo_reindex";
        let (utxo, wallet) = fresh_utxo(node_id);
        assert_eq!(utxo.count_transactions().unwrap(), 1);

        let mut pub_key_hash = wallet.public_key.clone();
        hash_pub_key(&mut pub_key_hash);
        let outs = utxo.find_utxo(&pub_key_hash).unwrap();
        assert_eq!(outs.outputs.len(), 1);
        assert_eq!(outs.outputs[0].value, SUBSIDY);
        cleanup(node_id);
    }

    #[test]
    fn test_find_spendable_outputs_stops_at_amount() {
        let node_id = "utxo_spendable";
        let (utxo, wallet) = fresh_utxo(node_id);
        let mut pub_key_hash = wallet.public_key.clone();
        hash_pub_key(&mut pub_key_hash);

        let (acc, outputs) = utxo.find_spendable_outputs(&pub_key_hash, 4).unwrap();
        assert_eq!(acc, SUBSIDY);
        assert_eq!(outputs.len(), 1);

        let (acc, outputs) = utxo
            .find_spendable_outputs(&pub_key_hash, SUBSIDY + 1)
            .unwrap();
        assert_eq!(acc, SUBSIDY);
        assert_eq!(outputs.len(), 1);

        let stranger = Wallet::new();
        let mut stranger_hash = stranger.public_key.clone();
        hash_pub_key(&mut stranger_hash);
        let (acc, outputs) = utxo.find_spendable_outputs(&stranger_hash, 1).unwrap();
        assert_eq!(acc, 0);
        assert!(outputs.is_empty());
        cleanup(node_id);
    }

    #[test]
    fn test_update_matches_reindex() {
        let node_id = "utxo_consistency";
        let (utxo, wallet_a) = fresh_utxo(node_id);
        let wallet_b = Wallet::new();

        let tx =
            Transaction::new_utxo(&wallet_a, &wallet_b.get_address(), 3, &utxo).unwrap();
        let cbtx = Transaction::new_coinbase(&wallet_a.get_address(), String::new()).unwrap();
        let block = utxo.blockchain.mine_block(vec![cbtx, tx]).unwrap();

        utxo.update(&block).unwrap();
        let incremental = snapshot(&utxo);

        utxo.reindex().unwrap();
        let rebuilt = snapshot(&utxo);

        assert_eq!(incremental, rebuilt);
        cleanup(node_id);
    }

    #[test]
    fn test_update_drops_exhausted_transactions() {
        let node_id = "utxo_exhausted";
        let (utxo, wallet_a) = fresh_utxo(node_id);
        let wallet_b = Wallet::new();
        let genesis_txid = utxo.blockchain.iter().next().unwrap().get_transactions()[0]
            .id
            .clone();

        // spend the whole genesis output so its chainstate entry disappears
        let tx = Transaction::new_utxo(&wallet_a, &wallet_b.get_address(), SUBSIDY, &utxo)
            .unwrap();
        let cbtx = Transaction::new_coinbase(&wallet_b.get_address(), String::new()).unwrap();
        let block = utxo.blockchain.mine_block(vec![cbtx, tx]).unwrap();
        utxo.update(&block).unwrap();

        assert!(utxo
            .tree()
            .unwrap()
            .get(genesis_txid.as_bytes())
            .unwrap()
            .is_none());
        cleanup(node_id);
    }
}
