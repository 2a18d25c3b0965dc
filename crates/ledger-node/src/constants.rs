use std::time::Duration;

/// Default TCP port for gossip connections.
pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_HTTP_LISTEN: &str = "127.0.0.1:8080";

/// How many peers a single gossip step fans out to, and how many a `peers` reply lists.
pub const DEFAULT_GOSSIP_FANOUT: usize = 20;

/// Longest accepted line on the wire, newline excluded.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

pub const COMMAND_CHANNEL_CAPACITY: usize = 1024;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_IP_LOOKUP_URL: &str = "https://api.ipify.org";
pub const FALLBACK_EXTERNAL_IP: &str = "127.0.0.1";

/// Envelopes queued per connection before the peer counts as stalled. Sized
/// to hold a full catch-up burst of blocks.
pub const PEER_OUTBOUND_CAPACITY: usize = 8192;

/// How long a closing connection may spend flushing queued replies.
pub const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
