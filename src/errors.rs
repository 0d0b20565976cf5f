use failure::Fail;

pub type Result<T> = std::result::Result<T, failure::Error>;

#[derive(Debug, Fail)]
pub enum ChainError {
    #[fail(display = "invalid address: {}", addr)]
    InvalidAddress { addr: String },

    #[fail(display = "not enough funds: current balance {}", available)]
    InsufficientFunds { available: i32 },

    #[fail(display = "invalid transaction: {}", txid)]
    InvalidTransaction { txid: String },

    #[fail(display = "block not found: {}", hash)]
    BlockNotFound { hash: String },

    #[fail(display = "transaction not found: {}", txid)]
    TxNotFound { txid: String },

    #[fail(display = "blockchain already exists")]
    ChainExists,

    #[fail(display = "no existing blockchain found, create one first")]
    ChainMissing,

    #[fail(display = "unknown command: {}", cmd)]
    UnknownCommand { cmd: String },

    #[fail(display = "malformed message: {}", reason)]
    MalformedMessage { reason: String },
}
