mod block;
mod blockchain;
mod cli;
mod constants;
mod errors;
mod mempool;
mod message;
mod server;
mod transaction;
mod tx;
mod utxoset;
mod wallet;

use std::process::exit;

use env_logger::{Builder, Env};

use crate::cli::Cli;
use crate::errors::ChainError;

#[tokio::main]
async fn main() {
    Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut cli = Cli::new();
    if let Err(e) = cli.run().await {
        eprintln!("Error: {}", e);
        let code = match e.downcast_ref::<ChainError>() {
            Some(ChainError::ChainExists) => 254,
            _ => 1,
        };
        exit(code);
    }
}
