use serde::{Deserialize, Serialize};

use crate::constants::CMD_LEN;
use crate::errors::{ChainError, Result};

/// A wire message: `command[12]` (ASCII, NUL-padded) followed by the bincode
/// encoding of the command's payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Addr(Addrmsg),
    Version(Versionmsg),
    GetBlocks(GetBlocksmsg),
    Inv(Invmsg),
    GetData(GetDatamsg),
    Block(Blockmsg),
    Tx(Txmsg),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Addrmsg {
    pub addr_list: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Versionmsg {
    pub addr_from: String,
    pub version: i32,
    pub best_height: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GetBlocksmsg {
    pub addr_from: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Invmsg {
    pub addr_from: String,
    pub kind: String,
    pub items: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GetDatamsg {
    pub addr_from: String,
    pub kind: String,
    pub id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Blockmsg {
    pub addr_from: String,
    /// Serialized block.
    pub block: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Txmsg {
    pub addr_from: String,
    /// Serialized transaction.
    pub transaction: Vec<u8>,
}

impl Message {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let (cmd, payload) = match self {
            Message::Addr(data) => ("addr", bincode::serialize(data)?),
            Message::Version(data) => ("version", bincode::serialize(data)?),
            Message::GetBlocks(data) => ("getblocks", bincode::serialize(data)?),
            Message::Inv(data) => ("inv", bincode::serialize(data)?),
            Message::GetData(data) => ("getdata", bincode::serialize(data)?),
            Message::Block(data) => ("block", bincode::serialize(data)?),
            Message::Tx(data) => ("tx", bincode::serialize(data)?),
        };
        let mut request = cmd_to_bytes(cmd).to_vec();
        request.extend(payload);
        Ok(request)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Message> {
        if bytes.len() < CMD_LEN {
            return Err(ChainError::MalformedMessage {
                reason: String::from("shorter than the command header"),
            }
            .into());
        }
        let cmd = bytes_to_cmd(&bytes[..CMD_LEN])?;
        let data = &bytes[CMD_LEN..];
        match cmd.as_str() {
            "addr" => Ok(Message::Addr(bincode::deserialize(data)?)),
            "version" => Ok(Message::Version(bincode::deserialize(data)?)),
            "getblocks" => Ok(Message::GetBlocks(bincode::deserialize(data)?)),
            "inv" => Ok(Message::Inv(bincode::deserialize(data)?)),
            "getdata" => Ok(Message::GetData(bincode::deserialize(data)?)),
            "block" => Ok(Message::Block(bincode::deserialize(data)?)),
            "tx" => Ok(Message::Tx(bincode::deserialize(data)?)),
            _ => Err(ChainError::UnknownCommand { cmd }.into()),
        }
    }
}

fn cmd_to_bytes(cmd: &str) -> [u8; CMD_LEN] {
    let mut data = [0; CMD_LEN];
    for (i, b) in cmd.as_bytes().iter().enumerate() {
        data[i] = *b;
    }
    data
}

fn bytes_to_cmd(bytes: &[u8]) -> Result<String> {
    let cmd: Vec<u8> = bytes.iter().copied().filter(|b| *b != 0).collect();
    String::from_utf8(cmd).map_err(|_| {
        ChainError::MalformedMessage {
            reason: String::from("command is not ASCII"),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_header_is_nul_padded() {
        let message = Message::Version(Versionmsg {
            addr_from: String::from("localhost:3001"),
            version: 1,
            best_height: 3,
        });
        let bytes = message.to_bytes().unwrap();
        assert_eq!(&bytes[..7], b"version");
        assert_eq!(&bytes[7..CMD_LEN], &[0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_round_trip_every_command() {
        let messages = vec![
            Message::Addr(Addrmsg {
                addr_list: vec![String::from("localhost:3001")],
            }),
            Message::Version(Versionmsg {
                addr_from: String::from("localhost:3001"),
                version: 1,
                best_height: 0,
            }),
            Message::GetBlocks(GetBlocksmsg {
                addr_from: String::from("localhost:3001"),
            }),
            Message::Inv(Invmsg {
                addr_from: String::from("localhost:3001"),
                kind: String::from("block"),
                items: vec![String::from("ab"), String::from("cd")],
            }),
            Message::GetData(GetDatamsg {
                addr_from: String::from("localhost:3001"),
                kind: String::from("tx"),
                id: String::from("ab"),
            }),
            Message::Block(Blockmsg {
                addr_from: String::from("localhost:3001"),
                block: vec![1, 2, 3],
            }),
            Message::Tx(Txmsg {
                addr_from: String::from("localhost:3001"),
                transaction: vec![4, 5, 6],
            }),
        ];
        for message in messages {
            let restored = Message::from_bytes(&message.to_bytes().unwrap()).unwrap();
            assert_eq!(restored, message);
        }
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        let mut bytes = cmd_to_bytes("bogus").to_vec();
        bytes.extend([0, 0]);
        let err = Message::from_bytes(&bytes).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChainError>(),
            Some(ChainError::UnknownCommand { .. })
        ));
    }

    #[test]
    fn test_truncated_header_is_rejected() {
        let err = Message::from_bytes(b"inv").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChainError>(),
            Some(ChainError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        let mut bytes = cmd_to_bytes("version").to_vec();
        bytes.extend([0xff]);
        assert!(Message::from_bytes(&bytes).is_err());
    }
}
