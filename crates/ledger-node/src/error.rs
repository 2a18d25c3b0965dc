use std::io;

use ledger_core::ChainError;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Errors of the gossip node. Protocol, framing and transport errors close the
/// connection they happened on and nothing else.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The peer sent a message kind this node does not speak.
    #[error("Protocol error: unknown message {0:?}")]
    Protocol(String),

    /// Undecodable, partial or over-long message.
    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// Invalid transaction or rejected block. Logged and dropped, never fatal.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),

    #[error("IP discovery failed: {0}")]
    Discovery(String),

    #[error("Node shutting down")]
    Shutdown,

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::Framing(err.to_string())
    }
}

impl From<LinesCodecError> for NodeError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                NodeError::Framing("message exceeds maximum line length".to_string())
            }
            LinesCodecError::Io(err) if err.kind() == io::ErrorKind::InvalidData => {
                NodeError::Framing(err.to_string())
            }
            LinesCodecError::Io(err) => NodeError::Transport(err),
        }
    }
}

/// Result type for node operations.
pub type NodeResult<T> = Result<T, NodeError>;
