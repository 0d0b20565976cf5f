use std::collections::HashMap;

use bitcoincash_addr::{Address, HashType, Scheme};
use crypto::digest::Digest;
use crypto::ripemd160::Ripemd160;
use crypto::sha2::Sha256;
use log::info;
use p256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};

use crate::constants::DATA_DIR;
use crate::errors::Result;

/// An ECDSA P-256 keypair. The public key is the uncompressed point with the
/// SEC1 tag stripped, i.e. X||Y as fixed-width big-endian integers.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Wallet {
    pub secret_key: Vec<u8>,
    pub public_key: Vec<u8>,
}

impl Wallet {
    pub(crate) fn new() -> Wallet {
        let secret = SigningKey::random(&mut rand::thread_rng());
        let public = secret.verifying_key().to_encoded_point(false);
        Wallet {
            secret_key: secret.to_bytes().to_vec(),
            public_key: public.as_bytes()[1..].to_vec(),
        }
    }

    pub fn get_address(&self) -> String {
        let mut pub_hash = self.public_key.clone();
        hash_pub_key(&mut pub_hash);
        let address = Address {
            body: pub_hash,
            scheme: Scheme::Base58,
            hash_type: HashType::Key,
            ..Default::default()
        };
        address.encode().unwrap()
    }
}

/// Reduces a public key to its 20-byte lock: ripemd160(sha256(pub_key)).
pub fn hash_pub_key(pub_key: &mut Vec<u8>) {
    let mut hasher1 = Sha256::new();
    hasher1.input(pub_key);
    pub_key.resize(32, 0);
    hasher1.result(pub_key);
    let mut hasher2 = Ripemd160::new();
    hasher2.input(pub_key);
    pub_key.resize(20, 0);
    hasher2.result(pub_key);
}

/// Base58Check validation: decoding re-derives the 4-byte checksum.
pub fn validate_address(address: &str) -> bool {
    Address::decode(address).is_ok()
}

pub struct Wallets {
    db_path: String,
    wallets: HashMap<String, Wallet>,
}

impl Wallets {
    pub fn new(node_id: &str) -> Result<Wallets> {
        let db_path = format!("{}/wallets_{}", DATA_DIR, node_id);
        let mut wlt = Wallets {
            db_path: db_path.clone(),
            wallets: HashMap::new(),
        };
        let db = sled::open(&db_path)?;
        for item in db.iter() {
            let (key, value) = item?;
            let address = String::from_utf8(key.to_vec())?;
            let wallet: Wallet = bincode::deserialize(&value)?;
            wlt.wallets.insert(address, wallet);
        }
        drop(db);
        Ok(wlt)
    }

    pub fn create_wallet(&mut self) -> String {
        let wallet = Wallet::new();
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        info!("created wallet {}", address);
        address
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    pub fn get_all_addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    pub fn save_all(&self) -> Result<()> {
        let db = sled::open(&self.db_path)?;
        for (address, wallet) in &self.wallets {
            db.insert(address.as_bytes(), bincode::serialize(wallet)?)?;
        }
        db.flush()?;
        Ok(())
    }
}
