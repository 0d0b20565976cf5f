use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::block::Block;
use crate::constants::{CENTRAL_NODE, NET_TIMEOUT_SECS, NODE_VERSION};
use crate::errors::{ChainError, Result};
use crate::mempool::Mempool;
use crate::message::{
    Addrmsg, Blockmsg, GetBlocksmsg, GetDatamsg, Invmsg, Message, Txmsg, Versionmsg,
};
use crate::transaction::Transaction;
use crate::utxoset::UTXOSet;

/// One node of the gossip network. Every connection carries exactly one
/// framed message; shared state lives behind a single mutex.
#[derive(Clone)]
pub struct Server {
    node_address: String,
    mining_address: String,
    inner: Arc<Mutex<ServerInner>>,
}

struct ServerInner {
    known_nodes: HashSet<String>,
    utxo: UTXOSet,
    blocks_in_transit: Vec<String>,
    mempool: Mempool,
}

impl Server {
    pub fn new(node_id: &str, mining_address: &str, utxo: UTXOSet) -> Server {
        let mut known_nodes = HashSet::new();
        known_nodes.insert(String::from(CENTRAL_NODE));
        Server {
            node_address: format!("localhost:{}", node_id),
            mining_address: mining_address.to_string(),
            inner: Arc::new(Mutex::new(ServerInner {
                known_nodes,
                utxo,
                blocks_in_transit: Vec::new(),
                mempool: Mempool::new(),
            })),
        }
    }

    pub async fn start_server(&self) -> Result<()> {
        info!(
            "starting server at {}, mining address: {}",
            &self.node_address, &self.mining_address
        );
        let listener = TcpListener::bind(&self.node_address).await?;
        if self.node_address != CENTRAL_NODE {
            self.send_version(CENTRAL_NODE).await?;
        }
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!("accepted connection from {}", peer);
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    warn!("dropping connection from {}: {}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        let mut request = Vec::new();
        timeout(
            Duration::from_secs(NET_TIMEOUT_SECS),
            stream.read_to_end(&mut request),
        )
        .await??;
        let message = Message::from_bytes(&request)?;
        self.handle_message(message).await
    }

    async fn handle_message(&self, message: Message) -> Result<()> {
        match message {
            Message::Addr(data) => self.handle_addr(data).await,
            Message::Version(data) => self.handle_version(data).await,
            Message::GetBlocks(data) => self.handle_get_blocks(data).await,
            Message::Inv(data) => self.handle_inv(data).await,
            Message::GetData(data) => self.handle_get_data(data).await,
            Message::Block(data) => self.handle_block(data).await,
            Message::Tx(data) => self.handle_tx(data).await,
        }
    }

    async fn handle_addr(&self, msg: Addrmsg) -> Result<()> {
        info!("received addr message with {} nodes", msg.addr_list.len());
        for node in msg.addr_list {
            self.add_node(&node);
        }
        for node in self.known_nodes() {
            self.send_get_blocks(&node).await?;
        }
        Ok(())
    }

    async fn handle_version(&self, msg: Versionmsg) -> Result<()> {
        info!("received version message: {:?}", msg);
        let my_best_height = self.best_height()?;
        if my_best_height < msg.best_height {
            self.send_get_blocks(&msg.addr_from).await?;
        } else if my_best_height > msg.best_height {
            self.send_version(&msg.addr_from).await?;
        }
        self.add_node(&msg.addr_from);
        Ok(())
    }

    async fn handle_get_blocks(&self, msg: GetBlocksmsg) -> Result<()> {
        info!("received getblocks message from {}", msg.addr_from);
        let hashes = self.block_hashes();
        self.send_inv(&msg.addr_from, "block", hashes).await
    }

    async fn handle_inv(&self, msg: Invmsg) -> Result<()> {
        info!(
            "received inventory with {} {} items",
            msg.items.len(),
            msg.kind
        );
        if msg.items.is_empty() {
            return Err(ChainError::MalformedMessage {
                reason: String::from("empty inventory"),
            }
            .into());
        }
        if msg.kind == "block" {
            let block_hash = msg.items[0].clone();
            self.send_get_data(&msg.addr_from, "block", &block_hash)
                .await?;
            let rest = msg
                .items
                .into_iter()
                .filter(|item| *item != block_hash)
                .collect();
            self.replace_in_transit(rest);
        } else if msg.kind == "tx" {
            let txid = &msg.items[0];
            if !self.mempool_contains(txid) {
                self.send_get_data(&msg.addr_from, "tx", txid).await?;
            }
        }
        Ok(())
    }

    async fn handle_get_data(&self, msg: GetDatamsg) -> Result<()> {
        info!("received getdata message: {:?}", msg);
        if msg.kind == "block" {
            let block = self.get_block(&msg.id)?;
            self.send_block(&msg.addr_from, &block).await?;
        } else if msg.kind == "tx" {
            let tx = self
                .mempool_get(&msg.id)
                .ok_or(ChainError::TxNotFound { txid: msg.id })?;
            self.send_tx(&msg.addr_from, &tx).await?;
        }
        Ok(())
    }

    async fn handle_block(&self, msg: Blockmsg) -> Result<()> {
        let block = Block::deserialize(&msg.block)?;
        info!("received block {}", block.get_hash());
        self.add_block(&block)?;

        let mut in_transit = self.get_in_transit();
        if !in_transit.is_empty() {
            let block_hash = in_transit.remove(0);
            self.send_get_data(&msg.addr_from, "block", &block_hash)
                .await?;
            self.replace_in_transit(in_transit);
        } else {
            self.utxo_reindex()?;
        }
        Ok(())
    }

    async fn handle_tx(&self, msg: Txmsg) -> Result<()> {
        let tx = Transaction::deserialize(&msg.transaction)?;
        info!("received transaction {} from {}", tx.id, msg.addr_from);
        let txid = tx.id.clone();
        self.mempool_insert(tx);

        if self.node_address == CENTRAL_NODE {
            for node in self.known_nodes() {
                if node != self.node_address && node != msg.addr_from {
                    self.send_inv(&node, "tx", vec![txid.clone()]).await?;
                }
            }
        } else if self.mempool_len() >= 2 && !self.mining_address.is_empty() {
            self.mine_pending_transactions().await?;
        }
        Ok(())
    }

    /// Drains the mempool into mined blocks, one block per round, until no
    /// pending transactions remain.
    async fn mine_pending_transactions(&self) -> Result<()> {
        loop {
            let mut txs = Vec::new();
            for tx in self.mempool_transactions() {
                if self.verify_transaction(&tx)? {
                    txs.push(tx);
                } else {
                    warn!("transaction {} fails verification, skipping it", tx.id);
                }
            }
            if txs.is_empty() {
                info!("all pending transactions are invalid, waiting for new ones");
                return Ok(());
            }

            let cbtx = Transaction::new_coinbase(&self.mining_address, String::new())?;
            txs.push(cbtx);

            let new_block = self.mine_block(txs.clone())?;
            self.utxo_reindex()?;
            info!("mined a new block {}", new_block.get_hash());

            for tx in &txs {
                self.mempool_remove(&tx.id);
            }
            for node in self.known_nodes() {
                if node != self.node_address {
                    self.send_inv(&node, "block", vec![new_block.get_hash()])
                        .await?;
                }
            }
            if self.mempool_len() == 0 {
                return Ok(());
            }
        }
    }

    async fn send_version(&self, addr: &str) -> Result<()> {
        info!("sending version to {}", addr);
        let message = Message::Version(Versionmsg {
            addr_from: self.node_address.clone(),
            version: NODE_VERSION,
            best_height: self.best_height()?,
        });
        self.send_data(addr, message).await
    }

    async fn send_get_blocks(&self, addr: &str) -> Result<()> {
        info!("sending getblocks to {}", addr);
        let message = Message::GetBlocks(GetBlocksmsg {
            addr_from: self.node_address.clone(),
        });
        self.send_data(addr, message).await
    }

    async fn send_inv(&self, addr: &str, kind: &str, items: Vec<String>) -> Result<()> {
        info!("sending inv to {} kind: {} items: {:?}", addr, kind, items);
        let message = Message::Inv(Invmsg {
            addr_from: self.node_address.clone(),
            kind: kind.to_string(),
            items,
        });
        self.send_data(addr, message).await
    }

    async fn send_get_data(&self, addr: &str, kind: &str, id: &str) -> Result<()> {
        info!("sending getdata to {} kind: {} id: {}", addr, kind, id);
        let message = Message::GetData(GetDatamsg {
            addr_from: self.node_address.clone(),
            kind: kind.to_string(),
            id: id.to_string(),
        });
        self.send_data(addr, message).await
    }

    async fn send_block(&self, addr: &str, block: &Block) -> Result<()> {
        info!("sending block {} to {}", block.get_hash(), addr);
        let message = Message::Block(Blockmsg {
            addr_from: self.node_address.clone(),
            block: block.serialize()?,
        });
        self.send_data(addr, message).await
    }

    async fn send_tx(&self, addr: &str, tx: &Transaction) -> Result<()> {
        info!("sending transaction {} to {}", tx.id, addr);
        let message = Message::Tx(Txmsg {
            addr_from: self.node_address.clone(),
            transaction: tx.serialize()?,
        });
        self.send_data(addr, message).await
    }

    /// Ships one framed message. An unreachable peer is dropped from the
    /// known-nodes set instead of failing the caller.
    async fn send_data(&self, addr: &str, message: Message) -> Result<()> {
        if addr == self.node_address {
            return Ok(());
        }
        let data = message.to_bytes()?;
        let connect = timeout(
            Duration::from_secs(NET_TIMEOUT_SECS),
            TcpStream::connect(addr),
        )
        .await?;
        let mut stream = match connect {
            Ok(stream) => stream,
            Err(e) => {
                warn!("{} is not reachable, removing it: {}", addr, e);
                self.remove_node(addr);
                return Ok(());
            }
        };
        timeout(
            Duration::from_secs(NET_TIMEOUT_SECS),
            stream.write_all(&data),
        )
        .await??;
        timeout(Duration::from_secs(NET_TIMEOUT_SECS), stream.shutdown()).await??;
        Ok(())
    }

    fn known_nodes(&self) -> HashSet<String> {
        self.inner.lock().unwrap().known_nodes.clone()
    }

    fn add_node(&self, addr: &str) {
        self.inner
            .lock()
            .unwrap()
            .known_nodes
            .insert(addr.to_string());
    }

    fn remove_node(&self, addr: &str) {
        self.inner.lock().unwrap().known_nodes.remove(addr);
    }

    fn get_in_transit(&self) -> Vec<String> {
        self.inner.lock().unwrap().blocks_in_transit.clone()
    }

    fn replace_in_transit(&self, hashes: Vec<String>) {
        self.inner.lock().unwrap().blocks_in_transit = hashes;
    }

    fn mempool_insert(&self, tx: Transaction) {
        self.inner.lock().unwrap().mempool.insert(tx);
    }

    fn mempool_get(&self, txid: &str) -> Option<Transaction> {
        self.inner.lock().unwrap().mempool.get(txid).cloned()
    }

    fn mempool_contains(&self, txid: &str) -> bool {
        self.inner.lock().unwrap().mempool.contains(txid)
    }

    fn mempool_remove(&self, txid: &str) {
        self.inner.lock().unwrap().mempool.remove(txid);
    }

    fn mempool_len(&self) -> usize {
        self.inner.lock().unwrap().mempool.len()
    }

    fn mempool_transactions(&self) -> Vec<Transaction> {
        self.inner.lock().unwrap().mempool.transactions()
    }

    fn best_height(&self) -> Result<i32> {
        self.inner.lock().unwrap().utxo.blockchain.get_best_height()
    }

    fn block_hashes(&self) -> Vec<String> {
        self.inner.lock().unwrap().utxo.blockchain.get_block_hashes()
    }

    fn get_block(&self, hash: &str) -> Result<Block> {
        self.inner.lock().unwrap().utxo.blockchain.get_block(hash)
    }

    fn add_block(&self, block: &Block) -> Result<()> {
        self.inner.lock().unwrap().utxo.blockchain.add_block(block)
    }

    fn mine_block(&self, txs: Vec<Transaction>) -> Result<Block> {
        self.inner.lock().unwrap().utxo.blockchain.mine_block(txs)
    }

    fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        self.inner
            .lock()
            .unwrap()
            .utxo
            .blockchain
            .verify_transaction(tx)
    }

    fn utxo_reindex(&self) -> Result<()> {
        self.inner.lock().unwrap().utxo.reindex()
    }
}

/// One-shot submission of a freshly signed transaction to the central node,
/// used by `send` when the sender does not mine itself.
pub async fn send_tx_to_central(node_id: &str, tx: &Transaction) -> Result<()> {
    let message = Message::Tx(Txmsg {
        addr_from: format!("localhost:{}", node_id),
        transaction: tx.serialize()?,
    });
    let data = message.to_bytes()?;
    let mut stream = timeout(
        Duration::from_secs(NET_TIMEOUT_SECS),
        TcpStream::connect(CENTRAL_NODE),
    )
    .await??;
    timeout(
        Duration::from_secs(NET_TIMEOUT_SECS),
        stream.write_all(&data),
    )
    .await??;
    timeout(Duration::from_secs(NET_TIMEOUT_SECS), stream.shutdown()).await??;
    Ok(())
}
