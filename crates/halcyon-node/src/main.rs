use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use halcyon_app::{shared, HttpServer, KvStoreApp, SocketServer};
use halcyon_proxy::Transport;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;
mod config;
mod node;

use cli::{Cli, Commands};
use config::{generate_sample_config, NodeConfig};
use node::{load_stored_state, Node};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The configured level applies to commands that read a config file.
    let configured = match &cli.command {
        Commands::Run { config, .. } | Commands::ShowState { config } if config.exists() => {
            NodeConfig::load(config).ok().map(|c| c.log_level)
        }
        _ => None,
    };
    let level = cli.log_level.clone().or(configured).unwrap_or_else(|| "info".to_string());
    init_logging(&level);

    match cli.command {
        Commands::Run { config, txs } => {
            run_node(config, txs).await?;
        }
        Commands::Init { output, chain_id } => {
            init_config(output, &chain_id)?;
        }
        Commands::Keygen { output } => {
            generate_keypair(output)?;
        }
        Commands::App { addr, transport } => {
            serve_app(&addr, transport).await?;
        }
        Commands::ShowState { config } => {
            show_state(&config)?;
        }
    }

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(config_path: &Path) -> Result<NodeConfig> {
    if !config_path.exists() {
        error!(
            "Configuration file not found: {:?}. Run 'halcyon init' to create one.",
            config_path
        );
        return Err(anyhow::anyhow!("Configuration file not found"));
    }
    NodeConfig::load(config_path)
}

/// Run a Halcyon node
async fn run_node(config_path: PathBuf, txs: Vec<String>) -> Result<()> {
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)?;

    let node = Node::new(config)?;
    node.run(txs.into_iter().map(String::into_bytes).collect()).await?;

    Ok(())
}

/// Initialize a new configuration file
fn init_config(output: PathBuf, chain_id: &str) -> Result<()> {
    info!("Generating sample configuration");

    let config = generate_sample_config(chain_id);
    config.save(&output)?;

    info!("Configuration saved to {:?}", output);
    if let Some(validator) = config.genesis.validators.first() {
        info!("  Validator: {}", validator.pub_key.to_hex());
    }

    println!("\nConfiguration file created: {}", output.display());
    println!("Edit the file to customize your node settings.");
    println!("\nTo start the node, run:");
    println!("  halcyon run --config {}", output.display());

    Ok(())
}

/// Generate a new keypair
fn generate_keypair(output: Option<PathBuf>) -> Result<()> {
    let keypair = halcyon_core::KeyPair::generate();

    println!("Generated new keypair:");
    println!("  Public key:  {}", keypair.public.to_hex());
    println!("  Secret key:  {}", keypair.secret.to_hex());

    if let Some(path) = output {
        std::fs::write(&path, keypair.secret.to_hex())?;
        info!("Secret key saved to {:?}", path);
    }

    println!("\nWARNING: Keep your secret key safe! Do not share it with anyone.");

    Ok(())
}

/// Serve the example kvstore until Ctrl-C
async fn serve_app(addr: &str, transport: Transport) -> Result<()> {
    let app = shared(KvStoreApp::new());
    let shutdown = CancellationToken::new();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
        }
        signal.cancel();
    });

    info!("Serving kvstore over {} at {}", transport, addr);
    match transport {
        Transport::Socket => SocketServer::bind(addr, app).await?.serve(shutdown).await?,
        Transport::Http => HttpServer::bind(addr, app).await?.serve(shutdown).await?,
    }

    Ok(())
}

/// Print the stored state of a stopped node
fn show_state(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    match load_stored_state(&config.data_dir)? {
        Some(state) => {
            println!("Stored state:");
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        None => println!("No state saved in {}", config.data_dir.display()),
    }

    Ok(())
}
