use std::collections::HashMap;

use crypto::digest::Digest;
use crypto::sha2::Sha256;
use log::{error, info};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::constants::SUBSIDY;
use crate::errors::{ChainError, Result};
use crate::tx::{TXInput, TXOutput};
use crate::utxoset::UTXOSet;
use crate::wallet::{hash_pub_key, Wallet};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: String,
    pub vin: Vec<TXInput>,
    pub vout: Vec<TXOutput>,
}

impl Transaction {
    /// Builds a signed transfer of `amount` to `to`, spending outputs locked
    /// to `wallet` and returning any change to it.
    pub fn new_utxo(wallet: &Wallet, to: &str, amount: i32, utxo: &UTXOSet) -> Result<Transaction> {
        info!("new transaction to: {} amount: {}", to, amount);
        let mut pub_key_hash = wallet.public_key.clone();
        hash_pub_key(&mut pub_key_hash);

        let (accumulated, valid_outputs) = utxo.find_spendable_outputs(&pub_key_hash, amount)?;
        if accumulated < amount {
            error!("not enough funds: wanted {} but found {}", amount, accumulated);
            return Err(ChainError::InsufficientFunds {
                available: accumulated,
            }
            .into());
        }

        let mut vin = Vec::new();
        for (txid, outs) in valid_outputs {
            for out in outs {
                vin.push(TXInput {
                    txid: txid.clone(),
                    vout: out,
                    signature: Vec::new(),
                    pub_key: wallet.public_key.clone(),
                });
            }
        }

        let from = wallet.get_address();
        let mut vout = vec![TXOutput::new(amount, to)?];
        if accumulated > amount {
            vout.push(TXOutput::new(accumulated - amount, &from)?);
        }

        let mut tx = Transaction {
            id: String::new(),
            vin,
            vout,
        };
        tx.id = tx.hash()?;
        utxo.blockchain.sign_transaction(&mut tx, &wallet.secret_key)?;
        Ok(tx)
    }

    /// Coinbase: one data-only input, one subsidy output to the miner.
    pub fn new_coinbase(to: &str, mut data: String) -> Result<Transaction> {
        if data.is_empty() {
            data = format!("Reward to '{}'", to);
        }
        let mut tx = Transaction {
            id: String::new(),
            vin: vec![TXInput {
                txid: String::new(),
                vout: -1,
                signature: Vec::new(),
                pub_key: data.into_bytes(),
            }],
            vout: vec![TXOutput::new(SUBSIDY, to)?],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == -1
    }

    /// Digest of the transaction with its id blanked.
    pub fn hash(&self) -> Result<String> {
        let mut copy = self.clone();
        copy.id = String::new();
        let data = bincode::serialize(&copy)?;
        let mut hasher = Sha256::new();
        hasher.input(&data);
        Ok(hasher.result_str())
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(data: &[u8]) -> Result<Transaction> {
        Ok(bincode::deserialize(data)?)
    }

    /// Signs every input against the outputs it spends. `prev_txs` must hold
    /// every referenced transaction.
    pub fn sign(
        &mut self,
        private_key: &[u8],
        prev_txs: &HashMap<String, Transaction>,
    ) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }
        let signing_key = SigningKey::from_slice(private_key)?;
        let mut tx_copy = self.trimmed_copy();

        for in_id in 0..tx_copy.vin.len() {
            let txid = tx_copy.vin[in_id].txid.clone();
            let prev_tx = prev_txs.get(&txid).ok_or(ChainError::TxNotFound { txid })?;
            let prev_out = prev_tx
                .vout
                .get(tx_copy.vin[in_id].vout as usize)
                .ok_or_else(|| ChainError::InvalidTransaction {
                    txid: self.id.clone(),
                })?;

            tx_copy.vin[in_id].signature.clear();
            tx_copy.vin[in_id].pub_key = prev_out.pub_key_hash.clone();
            tx_copy.id = tx_copy.hash()?;
            tx_copy.vin[in_id].pub_key = Vec::new();

            let signature: Signature = signing_key.sign(tx_copy.id.as_bytes());
            self.vin[in_id].signature = signature.to_vec();
        }
        Ok(())
    }

    /// Checks every input's signature against the output it spends. Any
    /// missing reference, malformed key or bad signature fails the whole
    /// transaction.
    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }
        let mut tx_copy = self.trimmed_copy();

        for in_id in 0..self.vin.len() {
            let vin = &self.vin[in_id];
            let prev_tx = match prev_txs.get(&vin.txid) {
                Some(prev) if !prev.id.is_empty() => prev,
                _ => return Ok(false),
            };
            let prev_out = match prev_tx.vout.get(vin.vout as usize) {
                Some(out) => out,
                None => return Ok(false),
            };

            tx_copy.vin[in_id].signature.clear();
            tx_copy.vin[in_id].pub_key = prev_out.pub_key_hash.clone();
            tx_copy.id = tx_copy.hash()?;
            tx_copy.vin[in_id].pub_key = Vec::new();

            let mut sec1 = vec![0x04];
            sec1.extend_from_slice(&vin.pub_key);
            let verifying_key = match VerifyingKey::from_sec1_bytes(&sec1) {
                Ok(key) => key,
                Err(_) => return Ok(false),
            };
            let signature = match Signature::from_slice(&vin.signature) {
                Ok(sig) => sig,
                Err(_) => return Ok(false),
            };
            if verifying_key
                .verify(tx_copy.id.as_bytes(), &signature)
                .is_err()
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Copy with all input signatures and keys blanked; the common shape both
    /// signing and verification derive their pre-images from.
    fn trimmed_copy(&self) -> Transaction {
        let mut vin = Vec::new();
        let mut vout = Vec::new();
        for v in &self.vin {
            vin.push(TXInput {
                txid: v.txid.clone(),
                vout: v.vout,
                signature: Vec::new(),
                pub_key: Vec::new(),
            });
        }
        for v in &self.vout {
            vout.push(TXOutput {
                value: v.value,
                pub_key_hash: v.pub_key_hash.clone(),
            });
        }
        Transaction {
            id: self.id.clone(),
            vin,
            vout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    fn signed_transfer(wallet: &Wallet) -> (Transaction, HashMap<String, Transaction>) {
        let address = wallet.get_address();
        let recipient = Wallet::new().get_address();
        let prev = Transaction::new_coinbase(&address, String::new()).unwrap();

        let mut tx = Transaction {
            id: String::new(),
            vin: vec![TXInput {
                txid: prev.id.clone(),
                vout: 0,
                signature: Vec::new(),
                pub_key: wallet.public_key.clone(),
            }],
            vout: vec![TXOutput::new(SUBSIDY, &recipient).unwrap()],
        };
        tx.id = tx.hash().unwrap();

        let mut prev_txs = HashMap::new();
        prev_txs.insert(prev.id.clone(), prev);
        tx.sign(&wallet.secret_key, &prev_txs).unwrap();
        (tx, prev_txs)
    }

    #[test]
    fn test_coinbase_shape() {
        let address = Wallet::new().get_address();
        let tx = Transaction::new_coinbase(&address, String::new()).unwrap();
        assert!(tx.is_coinbase());
        assert_eq!(tx.vout.len(), 1);
        assert_eq!(tx.vout[0].value, SUBSIDY);
        assert_eq!(tx.id, tx.hash().unwrap());
        assert_eq!(
            tx.vin[0].pub_key,
            format!("Reward to '{}'", address).into_bytes()
        );
    }

    #[test]
    fn test_hash_ignores_id_field() {
        let address = Wallet::new().get_address();
        let mut tx = Transaction::new_coinbase(&address, String::from("data")).unwrap();
        let digest = tx.hash().unwrap();
        tx.id = String::from("something else");
        assert_eq!(tx.hash().unwrap(), digest);
    }

    #[test]
    fn test_sign_and_verify() {
        let wallet = Wallet::new();
        let (tx, prev_txs) = signed_transfer(&wallet);
        assert_eq!(tx.vin[0].signature.len(), 64);
        assert!(tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_tampered_signature_fails() {
        let wallet = Wallet::new();
        let (mut tx, prev_txs) = signed_transfer(&wallet);
        tx.vin[0].signature[10] ^= 0x01;
        assert!(!tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_tampered_output_fails() {
        let wallet = Wallet::new();
        let (mut tx, prev_txs) = signed_transfer(&wallet);
        tx.vout[0].value += 1;
        assert!(!tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_missing_prev_tx_fails_verification() {
        let wallet = Wallet::new();
        let (tx, _) = signed_transfer(&wallet);
        assert!(!tx.verify(&HashMap::new()).unwrap());
    }

    #[test]
    fn test_serialize_round_trip() {
        let wallet = Wallet::new();
        let (tx, _) = signed_transfer(&wallet);
        let restored = Transaction::deserialize(&tx.serialize().unwrap()).unwrap();
        assert_eq!(restored, tx);
    }

    #[test]
    fn test_verify_accepts_coinbase() {
        let address = Wallet::new().get_address();
        let tx = Transaction::new_coinbase(&address, String::new()).unwrap();
        assert!(tx.verify(&HashMap::new()).unwrap());
    }
}
