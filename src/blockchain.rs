use std::collections::HashMap;
use std::path::Path;

use failure::format_err;
use log::{debug, info};
use sled::transaction::TransactionError;
use sled::{Db, Tree};

use crate::block::Block;
use crate::constants::{DATA_DIR, GENESIS_COINBASE_DATA};
use crate::errors::{ChainError, Result};
use crate::transaction::Transaction;
use crate::tx::TXOutputs;

const BLOCKS_TREE: &str = "blocks";
const TIP_KEY: &str = "l";

/// Content-addressed block store: `hash -> block` plus a `"l"` tip pointer.
/// The tip is read from the store on demand so every clone of the handle
/// observes the current chain head.
#[derive(Clone, Debug)]
pub struct Blockchain {
    db: Db,
    blocks: Tree,
}

pub struct BlockchainIter<'a> {
    current_hash: String,
    bc: &'a Blockchain,
}

impl Blockchain {
    /// Opens the existing chain for `node_id`.
    pub fn new(node_id: &str) -> Result<Blockchain> {
        let path = format!("{}/blocks_{}", DATA_DIR, node_id);
        if !Path::new(&path).exists() {
            return Err(ChainError::ChainMissing.into());
        }
        let db = sled::open(&path)?;
        let blocks = db.open_tree(BLOCKS_TREE)?;
        if blocks.get(TIP_KEY)?.is_none() {
            return Err(ChainError::ChainMissing.into());
        }
        debug!("found block database at {}", path);
        Ok(Blockchain { db, blocks })
    }

    /// Creates a fresh chain whose genesis coinbase pays `address`.
    pub fn create_blockchain(address: &str, node_id: &str) -> Result<Blockchain> {
        let path = format!("{}/blocks_{}", DATA_DIR, node_id);
        if Path::new(&path).exists() {
            return Err(ChainError::ChainExists.into());
        }
        info!("creating a new blockchain at {}", path);

        let cbtx = Transaction::new_coinbase(address, String::from(GENESIS_COINBASE_DATA))?;
        let genesis = Block::new_genesis_block(cbtx)?;
        let hash = genesis.get_hash();
        let serialized = genesis.serialize()?;

        let db = sled::open(&path)?;
        let blocks = db.open_tree(BLOCKS_TREE)?;
        blocks
            .transaction(|t| {
                t.insert(hash.as_bytes(), serialized.clone())?;
                t.insert(TIP_KEY, hash.as_bytes())?;
                Ok(())
            })
            .map_err(|e: TransactionError| format_err!("genesis write failed: {:?}", e))?;
        db.flush()?;
        Ok(Blockchain { db, blocks })
    }

    pub(crate) fn db(&self) -> &Db {
        &self.db
    }

    fn get_tip(&self) -> Result<String> {
        let tip = self.blocks.get(TIP_KEY)?.ok_or(ChainError::ChainMissing)?;
        Ok(String::from_utf8(tip.to_vec())?)
    }

    /// Verifies, mines and persists a block extending the current tip. Block
    /// and tip pointer are written in one store transaction.
    pub fn mine_block(&self, transactions: Vec<Transaction>) -> Result<Block> {
        info!("mining a block with {} transactions", transactions.len());
        for tx in &transactions {
            if !self.verify_transaction(tx)? {
                return Err(ChainError::InvalidTransaction {
                    txid: tx.id.clone(),
                }
                .into());
            }
        }

        let last_hash = self.get_tip()?;
        let last_height = self.get_block(&last_hash)?.get_height();
        let new_block = Block::new(transactions, last_hash, last_height + 1)?;
        let hash = new_block.get_hash();
        let serialized = new_block.serialize()?;

        self.blocks
            .transaction(|t| {
                t.insert(hash.as_bytes(), serialized.clone())?;
                t.insert(TIP_KEY, hash.as_bytes())?;
                Ok(())
            })
            .map_err(|e: TransactionError| format_err!("block write failed: {:?}", e))?;
        self.db.flush()?;
        Ok(new_block)
    }

    /// Stores a peer-supplied block. A duplicate hash is silently ignored;
    /// the tip only advances when the new block is strictly higher.
    pub fn add_block(&self, block: &Block) -> Result<()> {
        let hash = block.get_hash();
        if self.blocks.get(hash.as_bytes())?.is_some() {
            debug!("block {} is already stored", hash);
            return Ok(());
        }
        if !block.validate()? {
            return Err(format_err!("block {} fails proof-of-work validation", hash));
        }

        let serialized = block.serialize()?;
        let tip_height = self.get_block(&self.get_tip()?)?.get_height();
        self.blocks
            .transaction(|t| {
                t.insert(hash.as_bytes(), serialized.clone())?;
                if block.get_height() > tip_height {
                    t.insert(TIP_KEY, hash.as_bytes())?;
                }
                Ok(())
            })
            .map_err(|e: TransactionError| format_err!("block write failed: {:?}", e))?;
        self.db.flush()?;
        Ok(())
    }

    pub fn get_block(&self, hash: &str) -> Result<Block> {
        let data = self
            .blocks
            .get(hash.as_bytes())?
            .ok_or_else(|| ChainError::BlockNotFound {
                hash: hash.to_string(),
            })?;
        Block::deserialize(&data)
    }

    pub fn get_best_height(&self) -> Result<i32> {
        Ok(self.get_block(&self.get_tip()?)?.get_height())
    }

    /// All block hashes, tip first.
    pub fn get_block_hashes(&self) -> Vec<String> {
        self.iter().map(|b| b.get_hash()).collect()
    }

    pub fn iter(&self) -> BlockchainIter {
        BlockchainIter {
            current_hash: self.get_tip().unwrap_or_default(),
            bc: self,
        }
    }

    /// Every unspent output in the chain, grouped by transaction id.
    pub fn find_utxo(&self) -> Result<HashMap<String, TXOutputs>> {
        let mut utxo: HashMap<String, TXOutputs> = HashMap::new();
        let mut spent_txos: HashMap<String, Vec<i32>> = HashMap::new();

        for block in self.iter() {
            for tx in block.get_transactions() {
                for (out_idx, out) in tx.vout.iter().enumerate() {
                    if let Some(spent) = spent_txos.get(&tx.id) {
                        if spent.contains(&(out_idx as i32)) {
                            continue;
                        }
                    }
                    utxo.entry(tx.id.clone())
                        .or_insert_with(|| TXOutputs {
                            outputs: Vec::new(),
                        })
                        .outputs
                        .push(out.clone());
                }
                if !tx.is_coinbase() {
                    for vin in &tx.vin {
                        spent_txos
                            .entry(vin.txid.clone())
                            .or_default()
                            .push(vin.vout);
                    }
                }
            }
        }
        Ok(utxo)
    }

    pub fn find_transaction(&self, id: &str) -> Result<Transaction> {
        for block in self.iter() {
            for tx in block.get_transactions() {
                if tx.id == id {
                    return Ok(tx.clone());
                }
            }
        }
        Err(ChainError::TxNotFound {
            txid: id.to_string(),
        }
        .into())
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, private_key: &[u8]) -> Result<()> {
        let prev_txs = self.get_prev_txs(tx, true)?;
        tx.sign(private_key, &prev_txs)
    }

    /// A transaction referencing outputs this chain does not know about is
    /// invalid, not an error.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.get_prev_txs(tx, false)?;
        tx.verify(&prev_txs)
    }

    fn get_prev_txs(&self, tx: &Transaction, strict: bool) -> Result<HashMap<String, Transaction>> {
        let mut prev_txs = HashMap::new();
        for vin in &tx.vin {
            match self.find_transaction(&vin.txid) {
                Ok(prev) => {
                    prev_txs.insert(prev.id.clone(), prev);
                }
                Err(e) => {
                    let not_found = matches!(
                        e.downcast_ref::<ChainError>(),
                        Some(ChainError::TxNotFound { .. })
                    );
                    if strict || !not_found {
                        return Err(e);
                    }
                }
            }
        }
        Ok(prev_txs)
    }
}

impl<'a> Iterator for BlockchainIter<'a> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_hash.is_empty() {
            return None;
        }
        match self.bc.get_block(&self.current_hash) {
            Ok(block) => {
                self.current_hash = block.get_prev_hash();
                Some(block)
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utxoset::UTXOSet;
    use crate::wallet::Wallet;
    use std::fs;

    fn fresh_chain(node_id: &str) -> (Blockchain, Wallet) {
        let _ = fs::remove_dir_all(format!("{}/blocks_{}", DATA_DIR, node_id));
        let wallet = Wallet::new();
        let bc = Blockchain::create_blockchain(&wallet.get_address(), node_id).unwrap();
        (bc, wallet)
    }

    fn cleanup(node_id: &str) {
        let _ = fs::remove_dir_all(format!("{}/blocks_{}", DATA_DIR, node_id));
    }

    fn balance(utxo: &UTXOSet, wallet: &Wallet) -> i32 {
        let mut pub_key_hash = wallet.public_key.clone();
        crate::wallet::hash_pub_key(&mut pub_key_hash);
        utxo.find_utxo(&pub_key_hash)
            .unwrap()
            .outputs
            .iter()
            .map(|out| out.value)
            .sum()
    }

    #[test]
    fn test_genesis_balance() {
        let node_id = "chain_genesis";
        let (bc, wallet) = fresh_chain(node_id);
        assert_eq!(bc.get_best_height().unwrap(), 0);
        assert_eq!(bc.get_block_hashes().len(), 1);

        let utxo = UTXOSet { blockchain: bc };
        utxo.reindex().unwrap();
        assert_eq!(balance(&utxo, &wallet), crate::constants::SUBSIDY);
        cleanup(node_id);
    }

    #[test]
    fn test_create_twice_fails() {
        let node_id = "chain_exists";
        let (_bc, wallet) = fresh_chain(node_id);
        let err = Blockchain::create_blockchain(&wallet.get_address(), node_id).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChainError>(),
            Some(ChainError::ChainExists)
        ));
        cleanup(node_id);
    }

    #[test]
    fn test_open_missing_chain_fails() {
        let err = Blockchain::new("no_such_chain").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChainError>(),
            Some(ChainError::ChainMissing)
        ));
    }

    #[test]
    fn test_send_with_mine() {
        let node_id = "chain_send";
        let (bc, wallet_a) = fresh_chain(node_id);
        let wallet_b = Wallet::new();
        let utxo = UTXOSet { blockchain: bc };
        utxo.reindex().unwrap();

        let tx =
            Transaction::new_utxo(&wallet_a, &wallet_b.get_address(), 4, &utxo).unwrap();
        let cbtx = Transaction::new_coinbase(&wallet_a.get_address(), String::new()).unwrap();
        let block = utxo.blockchain.mine_block(vec![cbtx, tx]).unwrap();
        utxo.update(&block).unwrap();

        assert_eq!(utxo.blockchain.get_best_height().unwrap(), 1);
        assert_eq!(block.get_transactions().len(), 2);
        assert!(block.get_transactions()[0].is_coinbase());
        // sender keeps the change plus the reward for mining the block
        assert_eq!(balance(&utxo, &wallet_a), 6 + crate::constants::SUBSIDY);
        assert_eq!(balance(&utxo, &wallet_b), 4);
        cleanup(node_id);
    }

    #[test]
    fn test_insufficient_funds() {
        let node_id = "chain_poor";
        let (bc, wallet_a) = fresh_chain(node_id);
        let wallet_b = Wallet::new();
        let utxo = UTXOSet { blockchain: bc };
        utxo.reindex().unwrap();

        let err = Transaction::new_utxo(&wallet_a, &wallet_b.get_address(), 11, &utxo)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChainError>(),
            Some(ChainError::InsufficientFunds { available: 10 })
        ));
        assert_eq!(utxo.blockchain.get_best_height().unwrap(), 0);
        cleanup(node_id);
    }

    #[test]
    fn test_mine_block_rejects_invalid_transaction() {
        let node_id = "chain_invalid_tx";
        let (bc, wallet_a) = fresh_chain(node_id);
        let wallet_b = Wallet::new();
        let utxo = UTXOSet { blockchain: bc };
        utxo.reindex().unwrap();

        let mut tx =
            Transaction::new_utxo(&wallet_a, &wallet_b.get_address(), 4, &utxo).unwrap();
        tx.vin[0].signature[0] ^= 0x01;
        let err = utxo.blockchain.mine_block(vec![tx]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChainError>(),
            Some(ChainError::InvalidTransaction { .. })
        ));
        cleanup(node_id);
    }

    #[test]
    fn test_add_block_is_idempotent_and_tip_monotone() {
        let node_id = "chain_add_block";
        let (bc, wallet) = fresh_chain(node_id);
        let utxo = UTXOSet {
            blockchain: bc.clone(),
        };
        utxo.reindex().unwrap();

        let cbtx = Transaction::new_coinbase(&wallet.get_address(), String::new()).unwrap();
        let mined = bc.mine_block(vec![cbtx]).unwrap();
        assert_eq!(bc.get_best_height().unwrap(), 1);

        // a duplicate is ignored
        bc.add_block(&mined).unwrap();
        assert_eq!(bc.get_best_height().unwrap(), 1);
        assert_eq!(bc.get_block_hashes().len(), 2);

        // a lower side block is stored but never advances the tip
        let cbtx = Transaction::new_coinbase(&wallet.get_address(), String::new()).unwrap();
        let side = Block::new(vec![cbtx], String::from("ffff"), 0).unwrap();
        bc.add_block(&side).unwrap();
        assert_eq!(bc.get_best_height().unwrap(), 1);
        assert_eq!(bc.get_block_hashes()[0], mined.get_hash());
        cleanup(node_id);
    }

    #[test]
    fn test_find_transaction() {
        let node_id = "chain_find_tx";
        let (bc, _wallet) = fresh_chain(node_id);
        let genesis_tx = bc.iter().next().unwrap().get_transactions()[0].clone();
        assert_eq!(bc.find_transaction(&genesis_tx.id).unwrap(), genesis_tx);
        assert!(bc.find_transaction("missing").is_err());
        cleanup(node_id);
    }

    #[test]
    fn test_block_hashes_run_tip_to_genesis() {
        let node_id = "chain_hashes";
        let (bc, wallet) = fresh_chain(node_id);
        let utxo = UTXOSet {
            blockchain: bc.clone(),
        };
        utxo.reindex().unwrap();
        let cbtx = Transaction::new_coinbase(&wallet.get_address(), String::new()).unwrap();
        let mined = bc.mine_block(vec![cbtx]).unwrap();

        let hashes = bc.get_block_hashes();
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0], mined.get_hash());
        assert_eq!(hashes[1], mined.get_prev_hash());
        cleanup(node_id);
    }
}
