use std::path::PathBuf;

use clap::{Parser, Subcommand};
use halcyon_proxy::Transport;

/// Halcyon - a BFT state machine replication engine
#[derive(Parser)]
#[command(name = "halcyon")]
#[command(about = "Halcyon node and utilities")]
#[command(version)]
pub struct Cli {
    /// Log filter, e.g. `info` or `halcyon_consensus=debug`. Overrides the
    /// configured level; `RUST_LOG` overrides both.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a Halcyon node
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Transaction to submit once the node is up, e.g. `name=halcyon`
        #[arg(long = "tx")]
        txs: Vec<String>,
    },

    /// Initialize a single-validator node configuration
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,

        /// Chain ID written into the genesis document
        #[arg(long, default_value = "halcyon-local")]
        chain_id: String,
    },

    /// Generate a new validator keypair
    Keygen {
        /// Output file for secret key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Serve the example key-value application to a node in another process
    App {
        /// Listen address (`tcp://host:port` or `unix://path`)
        #[arg(short, long, default_value = "tcp://127.0.0.1:26658")]
        addr: String,

        /// Wire transport: socket or http
        #[arg(short, long, default_value = "socket")]
        transport: Transport,
    },

    /// Print the stored consensus state of a stopped node
    ShowState {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },
}
