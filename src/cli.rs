use std::env;
use std::process::exit;

use bitcoincash_addr::Address;
use clap::{arg, Command};

use crate::blockchain::Blockchain;
use crate::errors::{ChainError, Result};
use crate::server::{self, Server};
use crate::transaction::Transaction;
use crate::utxoset::UTXOSet;
use crate::wallet::{validate_address, Wallets};

pub struct Cli;

impl Cli {
    pub fn new() -> Cli {
        Cli
    }

    pub async fn run(&mut self) -> Result<()> {
        let matches = Command::new("rustcoin")
            .version("0.1")
            .about("a minimal UTXO proof-of-work cryptocurrency node")
            .subcommand_required(true)
            .subcommand(
                Command::new("createblockchain")
                    .about("create a new blockchain and send the genesis reward to ADDRESS")
                    .arg(arg!(<ADDRESS> "the address the genesis block reward goes to")),
            )
            .subcommand(Command::new("createwallet").about("generate a new keypair and address"))
            .subcommand(
                Command::new("getbalance")
                    .about("get the balance of ADDRESS")
                    .arg(arg!(<ADDRESS> "the address to get the balance for")),
            )
            .subcommand(Command::new("listaddresses").about("list all wallet addresses"))
            .subcommand(Command::new("printchain").about("print all blocks, tip first"))
            .subcommand(Command::new("reindexutxo").about("rebuild the UTXO set"))
            .subcommand(
                Command::new("send")
                    .about("send AMOUNT of coins from FROM to TO")
                    .arg(arg!(<FROM> "the source wallet address"))
                    .arg(arg!(<TO> "the destination wallet address"))
                    .arg(arg!(<AMOUNT> "the amount to send"))
                    .arg(arg!(-m --mine "mine the transaction immediately on this node")),
            )
            .subcommand(
                Command::new("startnode")
                    .about("start a node with the id taken from NODE_ID")
                    .arg(arg!(-m --miner <ADDRESS> "enable mining and send rewards to ADDRESS")),
            )
            .try_get_matches();
        let matches = match matches {
            Ok(matches) => matches,
            Err(e) => {
                e.print()?;
                exit(1);
            }
        };

        let node_id = match env::var("NODE_ID") {
            Ok(id) => id,
            Err(_) => {
                eprintln!("NODE_ID env. var is not set!");
                exit(1);
            }
        };

        match matches.subcommand() {
            Some(("createblockchain", sub)) => {
                let address = sub.get_one::<String>("ADDRESS").unwrap();
                cmd_create_blockchain(address, &node_id)?;
            }
            Some(("createwallet", _)) => {
                let mut wallets = Wallets::new(&node_id)?;
                let address = wallets.create_wallet();
                wallets.save_all()?;
                println!("Your new address: {}", address);
            }
            Some(("getbalance", sub)) => {
                let address = sub.get_one::<String>("ADDRESS").unwrap();
                let balance = cmd_get_balance(address, &node_id)?;
                println!("Balance of '{}': {}", address, balance);
            }
            Some(("listaddresses", _)) => {
                let wallets = Wallets::new(&node_id)?;
                for address in wallets.get_all_addresses() {
                    println!("{}", address);
                }
            }
            Some(("printchain", _)) => {
                cmd_print_chain(&node_id)?;
            }
            Some(("reindexutxo", _)) => {
                let count = cmd_reindex_utxo(&node_id)?;
                println!("Done! There are {} transactions in the UTXO set.", count);
            }
            Some(("send", sub)) => {
                let from = sub.get_one::<String>("FROM").unwrap();
                let to = sub.get_one::<String>("TO").unwrap();
                let amount: i32 = sub.get_one::<String>("AMOUNT").unwrap().parse()?;
                let mine_now = sub.get_flag("mine");
                cmd_send(from, to, amount, &node_id, mine_now).await?;
                println!("Success!");
            }
            Some(("startnode", sub)) => {
                let miner = sub
                    .get_one::<String>("miner")
                    .cloned()
                    .unwrap_or_default();
                cmd_start_node(&node_id, &miner).await?;
            }
            _ => unreachable!(),
        }
        Ok(())
    }
}

fn cmd_create_blockchain(address: &str, node_id: &str) -> Result<()> {
    if !validate_address(address) {
        return Err(ChainError::InvalidAddress {
            addr: address.to_string(),
        }
        .into());
    }
    let bc = Blockchain::create_blockchain(address, node_id)?;
    let utxo = UTXOSet { blockchain: bc };
    utxo.reindex()?;
    println!("Done!");
    Ok(())
}

fn cmd_get_balance(address: &str, node_id: &str) -> Result<i32> {
    let pub_key_hash = Address::decode(address)
        .map_err(|_| ChainError::InvalidAddress {
            addr: address.to_string(),
        })?
        .body;
    let bc = Blockchain::new(node_id)?;
    let utxo = UTXOSet { blockchain: bc };

    let mut balance = 0;
    for out in utxo.find_utxo(&pub_key_hash)?.outputs {
        balance += out.value;
    }
    Ok(balance)
}

async fn cmd_send(from: &str, to: &str, amount: i32, node_id: &str, mine_now: bool) -> Result<()> {
    if !validate_address(from) {
        return Err(ChainError::InvalidAddress {
            addr: from.to_string(),
        }
        .into());
    }
    if !validate_address(to) {
        return Err(ChainError::InvalidAddress {
            addr: to.to_string(),
        }
        .into());
    }
    if amount <= 0 {
        return Err(failure::format_err!("amount must be positive"));
    }

    let bc = Blockchain::new(node_id)?;
    let utxo = UTXOSet { blockchain: bc };
    let wallets = Wallets::new(node_id)?;
    let wallet = wallets
        .get_wallet(from)
        .ok_or_else(|| ChainError::InvalidAddress {
            addr: from.to_string(),
        })?;

    let tx = Transaction::new_utxo(wallet, to, amount, &utxo)?;
    if mine_now {
        let cbtx = Transaction::new_coinbase(from, String::new())?;
        let new_block = utxo.blockchain.mine_block(vec![cbtx, tx])?;
        utxo.update(&new_block)?;
    } else {
        server::send_tx_to_central(node_id, &tx).await?;
    }
    Ok(())
}

fn cmd_print_chain(node_id: &str) -> Result<()> {
    let bc = Blockchain::new(node_id)?;
    for block in bc.iter() {
        println!("============ Block {} ============", block.get_hash());
        println!("Height: {}", block.get_height());
        println!("Prev. block: {}", block.get_prev_hash());
        println!("PoW: {}", block.validate()?);
        for tx in block.get_transactions() {
            println!("{:#?}", tx);
        }
        println!();
    }
    Ok(())
}

fn cmd_reindex_utxo(node_id: &str) -> Result<i32> {
    let bc = Blockchain::new(node_id)?;
    let utxo = UTXOSet { blockchain: bc };
    utxo.reindex()?;
    utxo.count_transactions()
}

async fn cmd_start_node(node_id: &str, miner: &str) -> Result<()> {
    if !miner.is_empty() && !validate_address(miner) {
        return Err(ChainError::InvalidAddress {
            addr: miner.to_string(),
        }
        .into());
    }
    let bc = Blockchain::new(node_id)?;
    let utxo = UTXOSet { blockchain: bc };
    let server = Server::new(node_id, miner, utxo);
    server.start_server().await
}
