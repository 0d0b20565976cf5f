use std::time::SystemTime;

use crypto::digest::Digest;
use crypto::sha2::Sha256;
use log::info;
use serde::{Deserialize, Serialize};
use uint::construct_uint;

use crate::constants::TARGET_BITS;
use crate::errors::Result as CrateResult;
use crate::transaction::Transaction;

construct_uint! {
    struct U256(4);
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Block {
    timestamp: u64,
    transactions: Vec<Transaction>,
    prev_block_hash: String,
    hash: String,
    nonce: i64,
    height: i32,
}

impl Block {
    pub fn new(transactions: Vec<Transaction>, prev_block_hash: String, height: i32) -> CrateResult<Block> {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_secs();
        let mut block = Block {
            timestamp,
            transactions,
            prev_block_hash,
            hash: String::new(),
            nonce: 0,
            height,
        };
        block.run_proof_of_work()?;
        Ok(block)
    }

    pub fn new_genesis_block(coinbase: Transaction) -> CrateResult<Block> {
        Block::new(vec![coinbase], String::new(), 0)
    }

    pub fn get_hash(&self) -> String {
        self.hash.clone()
    }

    pub fn get_prev_hash(&self) -> String {
        self.prev_block_hash.clone()
    }

    pub fn get_height(&self) -> i32 {
        self.height
    }

    pub fn get_transactions(&self) -> &Vec<Transaction> {
        &self.transactions
    }

    pub fn serialize(&self) -> CrateResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(data: &[u8]) -> CrateResult<Block> {
        Ok(bincode::deserialize(data)?)
    }

    /// Searches nonces from 0 upward until the digest falls below the target.
    fn run_proof_of_work(&mut self) -> CrateResult<()> {
        info!("mining a block at height {}", self.height);
        let mut raw = [0u8; 32];
        loop {
            let data = self.prepare_hash_data()?;
            let mut hasher = Sha256::new();
            hasher.input(&data);
            hasher.result(&mut raw);
            if hash_meets_target(&raw) {
                self.hash = hasher.result_str();
                return Ok(());
            }
            self.nonce += 1;
        }
    }

    /// Recomputes the digest from the stored nonce and checks both the
    /// target bound and equality with the stored hash.
    pub fn validate(&self) -> CrateResult<bool> {
        let data = self.prepare_hash_data()?;
        let mut hasher = Sha256::new();
        hasher.input(&data);
        let mut raw = [0u8; 32];
        hasher.result(&mut raw);
        Ok(hash_meets_target(&raw) && hasher.result_str() == self.hash)
    }

    fn prepare_hash_data(&self) -> CrateResult<Vec<u8>> {
        let content = (
            self.prev_block_hash.clone(),
            self.hash_transactions()?,
            self.timestamp,
            TARGET_BITS,
            self.nonce,
        );
        Ok(bincode::serialize(&content)?)
    }

    /// Merkle root over the serialized transactions; a level with an odd
    /// node count duplicates its last node.
    fn hash_transactions(&self) -> CrateResult<Vec<u8>> {
        let mut level = Vec::new();
        for tx in &self.transactions {
            level.push(sha256(&tx.serialize()?));
        }
        if level.is_empty() {
            level.push(sha256(&[]));
        }
        while level.len() > 1 {
            if level.len() % 2 != 0 {
                level.push(level.last().unwrap().clone());
            }
            let mut next = Vec::with_capacity(level.len() / 2);
            for pair in level.chunks(2) {
                let mut data = pair[0].clone();
                data.extend_from_slice(&pair[1]);
                next.push(sha256(&data));
            }
            level = next;
        }
        Ok(level.remove(0))
    }
}

fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.input(data);
    let mut out = [0u8; 32];
    hasher.result(&mut out);
    out.to_vec()
}

fn hash_meets_target(hash: &[u8; 32]) -> bool {
    let target = U256::one() << (256 - TARGET_BITS);
    U256::from_big_endian(hash) < target
}
