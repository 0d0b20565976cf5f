use bitcoincash_addr::Address;
use serde::{Deserialize, Serialize};

use crate::errors::{ChainError, Result};
use crate::wallet::hash_pub_key;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TXInput {
    /// Id of the transaction holding the output being spent; empty on coinbase.
    pub txid: String,
    /// Index of that output, or -1 on coinbase.
    pub vout: i32,
    /// r||s, each half big-endian; empty until signed.
    pub signature: Vec<u8>,
    /// Uncompressed X||Y key of the spender; on coinbase this carries
    /// arbitrary data instead.
    pub pub_key: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TXOutput {
    pub value: i32,
    pub pub_key_hash: Vec<u8>,
}

/// The unspent outputs of one transaction, as stored in the chainstate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TXOutputs {
    pub outputs: Vec<TXOutput>,
}

impl TXInput {
    /// Whether this input was created by the owner of `pub_key_hash`.
    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        let mut locking_hash = self.pub_key.clone();
        hash_pub_key(&mut locking_hash);
        locking_hash == pub_key_hash
    }
}

impl TXOutput {
    pub fn new(value: i32, address: &str) -> Result<TXOutput> {
        let mut txo = TXOutput {
            value,
            pub_key_hash: Vec::new(),
        };
        txo.lock(address)?;
        Ok(txo)
    }

    fn lock(&mut self, address: &str) -> Result<()> {
        let pub_key_hash = Address::decode(address)
            .map_err(|_| ChainError::InvalidAddress {
                addr: address.to_string(),
            })?
            .body;
        self.pub_key_hash = pub_key_hash;
        Ok(())
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash == pub_key_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    #[test]
    fn test_output_locks_to_address_hash() {
        let wallet = Wallet::new();
        let address = wallet.get_address();

        let out = TXOutput::new(7, &address).unwrap();
        let mut expected = wallet.public_key.clone();
        hash_pub_key(&mut expected);
        assert_eq!(out.pub_key_hash, expected);
        assert!(out.is_locked_with_key(&expected));
    }

    #[test]
    fn test_lock_rejects_bad_address() {
        assert!(TXOutput::new(1, "definitely not base58").is_err());
    }

    #[test]
    fn test_input_uses_key() {
        let wallet_a = Wallet::new();
        let wallet_b = Wallet::new();
        let input = TXInput {
            txid: String::from("aa"),
            vout: 0,
            signature: Vec::new(),
            pub_key: wallet_a.public_key.clone(),
        };
        let mut hash_a = wallet_a.public_key.clone();
        hash_pub_key(&mut hash_a);
        let mut hash_b = wallet_b.public_key.clone();
        hash_pub_key(&mut hash_b);
        assert!(input.uses_key(&hash_a));
        assert!(!input.uses_key(&hash_b));
    }
}
