//! Lattice daemon: entry point for running a node.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use lattice_crypto::{encode_account, generate_keypair};
use lattice_node::{init_logging, LogFormat, NetworkParams, Node, NodeConfig};
use lattice_types::NetworkId;

#[derive(Parser)]
#[command(name = "lattice-daemon", about = "Block lattice node daemon")]
struct Cli {
    /// Network to join: "live", "test" or "dev".
    /// With a config file, defaults to the file's network.
    #[arg(long, env = "LATTICE_NETWORK")]
    network: Option<NetworkId>,

    /// Directory for the ledger database and node key.
    #[arg(long, env = "LATTICE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Peering port (defaults to the network's port).
    #[arg(long, env = "LATTICE_PORT")]
    port: Option<u16>,

    /// Peers contacted at startup (comma-separated "host:port").
    #[arg(long, env = "LATTICE_PEERS", value_delimiter = ',')]
    peers: Vec<String>,

    /// Hex private keys of representatives to vote with (comma-separated).
    #[arg(long, env = "LATTICE_VOTING_KEYS", value_delimiter = ',', hide_env_values = true)]
    voting_keys: Vec<String>,

    /// Write Prometheus metrics to the data directory.
    #[arg(long, env = "LATTICE_ENABLE_METRICS")]
    metrics: bool,

    /// "trace", "debug", "info", "warn" or "error".
    #[arg(long, env = "LATTICE_LOG_LEVEL")]
    log_level: Option<String>,

    /// "human" or "json".
    #[arg(long, env = "LATTICE_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// TOML config file. Its settings are the base; flags and env vars
    /// override them.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Node operations.
    #[command(name = "node")]
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
}

#[derive(clap::Subcommand)]
enum NodeAction {
    /// Run the node until SIGINT or SIGTERM.
    Run,
    /// Print the effective configuration as TOML.
    Config,
    /// Generate a key pair for a representative.
    Keygen,
}

impl Cli {
    fn node_config(&self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_toml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => NodeConfig::for_network(self.network.unwrap_or(NetworkId::Dev)),
        };
        if let Some(network) = self.network {
            if network != config.network {
                config.network = network;
                config.peering_port = network.default_port();
            }
        }
        if let Some(data_dir) = &self.data_dir {
            config.data_path = data_dir.clone();
        }
        if let Some(port) = self.port {
            config.peering_port = port;
        }
        if !self.peers.is_empty() {
            config.preconfigured_peers = self.peers.clone();
        }
        if !self.voting_keys.is_empty() {
            config.voting_keys = self.voting_keys.clone();
        }
        config.enable_metrics |= self.metrics;
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.node_config()?;

    match cli.command {
        Command::Node { action } => match action {
            NodeAction::Run => run(config).await,
            NodeAction::Config => {
                print!("{}", config.to_toml_string()?);
                Ok(())
            }
            NodeAction::Keygen => {
                let key = generate_keypair();
                println!("private: {}", hex::encode(key.private.0));
                println!("account: {}", encode_account(&key.account()));
                Ok(())
            }
        },
    }
}

async fn run(config: NodeConfig) -> anyhow::Result<()> {
    init_logging(config.log_format, &config.log_level);
    tracing::info!(
        network = config.network.as_str(),
        port = config.peering_port,
        data = %config.data_path.display(),
        "starting node"
    );
    if !config.preconfigured_peers.is_empty() {
        tracing::info!(peers = %config.preconfigured_peers.join(", "), "preconfigured peers");
    }

    let params = NetworkParams::new(config.network);
    let node = Node::new(config, params).context("opening node")?;
    let address = node.start().await?;
    tracing::info!(%address, node_id = %encode_account(&node.node_key.account()), "node running");

    node.shutdown.wait_for_signal().await;
    node.stop().await?;
    tracing::info!("daemon exited cleanly");
    Ok(())
}
