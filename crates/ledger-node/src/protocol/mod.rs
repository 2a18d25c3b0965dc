//! Wire protocol: newline-delimited JSON envelopes.

mod framing;
mod messages;

pub use framing::EnvelopeCodec;
pub use messages::{Envelope, Message, PeerAddress, Peers, Ping};
