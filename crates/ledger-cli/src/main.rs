use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ledger_core::{Block, Transaction};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "CLI client for a ledger node's HTTP API")]
struct Cli {
    /// Node base URL
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the chain tip
    Head,
    /// List blocks above a height (the whole chain by default)
    Blocks {
        #[arg(long)]
        from: Option<u64>,
    },
    /// List registered peers
    Peers,
    /// Submit a transaction
    Submit {
        #[arg(long)]
        sender: String,
        #[arg(long)]
        recipient: String,
        #[arg(long)]
        amount: u64,
    },
}

#[derive(Deserialize)]
struct Accepted {
    accepted: bool,
}

struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base);
        debug!(%url, "GET");
        let res = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?
            .error_for_status()?;
        Ok(res.json().await?)
    }

    async fn submit(&self, tx: &Transaction) -> Result<bool> {
        let url = format!("{}/tx", self.base);
        debug!(%url, "POST");
        let res = self
            .http
            .post(&url)
            .json(tx)
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?
            .error_for_status()?;
        Ok(res.json::<Accepted>().await?.accepted)
    }
}

fn blocks_path(from: Option<u64>) -> String {
    match from {
        Some(height) => format!("/chain/blocks?from={height}"),
        None => "/chain/blocks".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.node);
    match cli.cmd {
        Command::Head => {
            let head: Value = client.get("/chain/head").await?;
            println!("{}", serde_json::to_string_pretty(&head)?);
        }
        Command::Blocks { from } => {
            let blocks: Vec<Block> = client.get(&blocks_path(from)).await?;
            for block in &blocks {
                println!(
                    "{:>6}  {}  {} txs  {}",
                    block.height(),
                    block.hash(),
                    block.transactions().len(),
                    block.timestamp()
                );
            }
        }
        Command::Peers => {
            let peers: Vec<Value> = client.get("/peers").await?;
            for peer in peers {
                println!("{}:{}", peer["ip"].as_str().unwrap_or("?"), peer["port"]);
            }
        }
        Command::Submit {
            sender,
            recipient,
            amount,
        } => {
            let tx = Transaction::new(sender, recipient, amount);
            if client.submit(&tx).await? {
                println!("accepted");
            } else {
                println!("rejected (invalid or already pending)");
            }
        }
    }
    Ok(())
}
