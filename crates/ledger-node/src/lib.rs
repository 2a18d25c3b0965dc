//! Gossip ledger node library.
//!
//! Wire protocol, peer registry, gossip handlers and the node runtime. Used by
//! the `ledger-node` binary and by the integration tests.

pub mod api;
pub mod cli;
pub mod config;
pub mod constants;
pub mod discovery;
pub mod error;
pub mod gossip;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod shutdown;
pub mod state;
pub mod validator;

pub use config::NodeConfig;
pub use error::{NodeError, NodeResult};
pub use node::{ChainHead, Node, NodeHandle};
