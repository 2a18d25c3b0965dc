//! Node configuration.

use std::net::SocketAddr;
use std::time::Duration;

use ledger_core::Target;

use crate::cli::Cli;
use crate::constants::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_HTTP_LISTEN, DEFAULT_IP_LOOKUP_URL, DEFAULT_PORT};
use crate::protocol::PeerAddress;
use crate::state::GossipSettings;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Gossip listen address. Port 0 picks a free port; the bound one is advertised.
    pub listen: SocketAddr,

    /// HTTP status API address, `None` to disable it.
    pub http_listen: Option<SocketAddr>,

    /// Peers dialed at startup.
    pub bootstrap_peers: Vec<PeerAddress>,

    /// Advertised IP. Discovered over HTTP when `None`.
    pub external_ip: Option<String>,

    pub ip_lookup_url: String,

    pub mining_enabled: bool,

    pub gossip: GossipSettings,

    /// Close a connection after this long without a message.
    pub idle_timeout: Option<Duration>,

    pub connect_timeout: Duration,

    pub initial_target: Target,

    pub log_level: String,
}

impl NodeConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            listen: cli.listen,
            http_listen: (!cli.no_http).then_some(cli.http_listen),
            bootstrap_peers: cli.peers.clone(),
            external_ip: cli.external_ip.clone(),
            ip_lookup_url: cli.ip_lookup_url.clone(),
            mining_enabled: !cli.no_mine,
            gossip: GossipSettings {
                fanout: cli.gossip_fanout,
                strict_blocks: cli.strict_blocks,
            },
            idle_timeout: (cli.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(cli.idle_timeout_secs)),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            initial_target: cli.initial_target.clone().unwrap_or_default(),
            log_level: cli.log_level.clone(),
        }
    }

    /// Loopback-only configuration on free ports with no HTTP lookup, for
    /// tests and local clusters.
    pub fn local() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            http_listen: None,
            external_ip: Some("127.0.0.1".to_string()),
            ..Self::default()
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            http_listen: DEFAULT_HTTP_LISTEN.parse().ok(),
            bootstrap_peers: Vec::new(),
            external_ip: None,
            ip_lookup_url: DEFAULT_IP_LOOKUP_URL.to_string(),
            mining_enabled: true,
            gossip: GossipSettings::default(),
            idle_timeout: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            initial_target: Target::default(),
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.listen.port(), 8888);
        assert_eq!(config.http_listen.map(|a| a.port()), Some(8080));
        assert!(config.mining_enabled);
        assert_eq!(config.gossip.fanout, 20);
        assert!(!config.gossip.strict_blocks);
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn cli_matches_default() {
        let config = NodeConfig::from_cli(&Cli::parse_from(["ledger-node"]));
        let default = NodeConfig::default();
        assert_eq!(config.listen, default.listen);
        assert_eq!(config.http_listen, default.http_listen);
        assert_eq!(config.gossip, default.gossip);
        assert_eq!(config.initial_target, default.initial_target);
    }

    #[test]
    fn cli_flags_map_through() {
        let cli = Cli::parse_from([
            "ledger-node",
            "--no-http",
            "--no-mine",
            "--strict-blocks",
            "--gossip-fanout",
            "5",
            "--idle-timeout-secs",
            "30",
            "--external-ip",
            "203.0.113.7",
            "--log-level",
            "ledger_node=debug",
        ]);
        let config = NodeConfig::from_cli(&cli);
        assert!(config.http_listen.is_none());
        assert!(!config.mining_enabled);
        assert_eq!(
            config.gossip,
            GossipSettings {
                fanout: 5,
                strict_blocks: true
            }
        );
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.external_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(config.log_level, "ledger_node=debug");
    }
}
