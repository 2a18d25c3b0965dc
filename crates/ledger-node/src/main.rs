use ledger_node::cli::Cli;
use ledger_node::shutdown::spawn_signal_listener;
use ledger_node::{Node, NodeConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::from_cli(&Cli::parse_args());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("ledger-node v{}", env!("CARGO_PKG_VERSION"));

    let node = Node::bind(config).await?;
    info!(
        listen = %node.local_addr()?,
        identity = %node.identity(),
        http = ?node.http_addr(),
        "Listening for peers"
    );

    let handle = node.handle();
    spawn_signal_listener(handle.shutdown_sender());
    node.run().await?;
    Ok(())
}
