//! Response packet codec.
//!
//! Every reply crossing the engine boundary is one packet:
//!
//! ```text
//! [flag:1] [body:*]
//! ```
//!
//! Flag 0 carries a success body, flag 1 a UTF-8 error message. Line
//! framing (hex encoding, trailing newline) belongs to the transport
//! proper and is out of scope here.

use eyre::{Result, WrapErr};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Ok(Vec<u8>),
    Err(String),
}

impl Packet {
    /// Builds the reply packet for an execution outcome.
    pub fn from_result(result: Result<Vec<u8>>) -> Self {
        match result {
            Ok(body) => Packet::Ok(body),
            Err(e) => Packet::Err(e.to_string()),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Packet::Ok(body) => {
                let mut out = Vec::with_capacity(1 + body.len());
                out.push(0);
                out.extend_from_slice(body);
                out
            }
            Packet::Err(msg) => {
                let mut out = Vec::with_capacity(1 + msg.len());
                out.push(1);
                out.extend_from_slice(msg.as_bytes());
                out
            }
        }
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        let (&flag, body) = raw
            .split_first()
            .ok_or(EngineError::InvalidPacket)
            .wrap_err("empty packet")?;
        match flag {
            0 => Ok(Packet::Ok(body.to_vec())),
            1 => {
                let msg = std::str::from_utf8(body)
                    .map_err(|_| EngineError::InvalidPacket)
                    .wrap_err("error body is not UTF-8")?;
                Ok(Packet::Err(msg.to_owned()))
            }
            _ => Err(EngineError::InvalidPacket)
                .wrap_err_with(|| format!("unknown packet flag {flag}")),
        }
    }
}
