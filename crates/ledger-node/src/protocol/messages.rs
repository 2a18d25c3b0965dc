//! Message types exchanged between nodes.
//!
//! Every line on the wire is one envelope:
//! `{"name": ..., "payload": ..., "meta": {"address": {"ip": ..., "port": ...}}}`.

use std::fmt;
use std::str::FromStr;

use ledger_core::{Block, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NodeError, NodeResult};

/// Address a node advertises for itself, `ip:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddress {
    pub ip: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ip.contains(':') {
            write!(f, "[{}]:{}", self.ip, self.port)
        } else {
            write!(f, "{}:{}", self.ip, self.port)
        }
    }
}

impl FromStr for PeerAddress {
    type Err = NodeError;

    fn from_str(s: &str) -> NodeResult<Self> {
        let (ip, port) = s
            .rsplit_once(':')
            .ok_or_else(|| NodeError::InvalidAddress(s.to_string()))?;
        let ip = ip.trim_start_matches('[').trim_end_matches(']');
        if ip.is_empty() {
            return Err(NodeError::InvalidAddress(s.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| NodeError::InvalidAddress(s.to_string()))?;
        Ok(PeerAddress::new(ip, port))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub block_height: u64,
    pub is_miner: bool,
    /// Alive peers of the sender. Older nodes leave it out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peers {
    pub peers: Vec<PeerAddress>,
}

/// The four message kinds of the gossip protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Ping(Ping),
    Peers(Peers),
    Block(Block),
    Transaction(Transaction),
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Message::Ping(_) => "ping",
            Message::Peers(_) => "peers",
            Message::Block(_) => "block",
            Message::Transaction(_) => "transaction",
        }
    }

    fn payload(&self) -> serde_json::Result<Value> {
        match self {
            Message::Ping(ping) => serde_json::to_value(ping),
            Message::Peers(peers) => serde_json::to_value(peers),
            Message::Block(block) => serde_json::to_value(block),
            Message::Transaction(tx) => serde_json::to_value(tx),
        }
    }

    fn from_parts(name: &str, payload: Value) -> NodeResult<Self> {
        let message = match name {
            "ping" => Message::Ping(serde_json::from_value(payload)?),
            "peers" => Message::Peers(serde_json::from_value(payload)?),
            "block" => Message::Block(serde_json::from_value(payload)?),
            "transaction" => Message::Transaction(serde_json::from_value(payload)?),
            other => return Err(NodeError::Protocol(other.to_string())),
        };
        Ok(message)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    address: PeerAddress,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawEnvelope {
    name: String,
    payload: Value,
    meta: Meta,
}

/// A message plus the address its sender advertises.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub message: Message,
    pub sender: PeerAddress,
}

impl Envelope {
    pub fn new(message: Message, sender: PeerAddress) -> Self {
        Self { message, sender }
    }

    /// One JSON line, without the trailing newline.
    pub fn to_line(&self) -> NodeResult<String> {
        let raw = RawEnvelope {
            name: self.message.name().to_string(),
            payload: self.message.payload()?,
            meta: Meta {
                address: self.sender.clone(),
            },
        };
        Ok(serde_json::to_string(&raw)?)
    }

    /// Malformed JSON or payloads are framing errors; a well-formed envelope
    /// with an unknown `name` is a protocol error.
    pub fn from_line(line: &str) -> NodeResult<Self> {
        let raw: RawEnvelope = serde_json::from_str(line)?;
        let message = Message::from_parts(&raw.name, raw.payload)?;
        Ok(Envelope::new(message, raw.meta.address))
    }
}
