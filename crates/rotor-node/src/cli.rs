use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rotor_core::NodeId;

/// Rotor - A round-robin block proposal network
#[derive(Parser)]
#[command(name = "rotor")]
#[command(about = "Rotor node and utilities")]
#[command(version)]
pub struct Cli {
    /// Log filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a Rotor node
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Override the node id from the configuration file
        #[arg(long)]
        id: Option<NodeId>,
    },

    /// Initialize a new node configuration
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,

        /// Number of nodes in the network
        #[arg(long, default_value_t = 3)]
        nodes: u32,

        /// Id of the node this file is for
        #[arg(long, default_value_t = NodeId(0))]
        id: NodeId,

        /// Port of node0; node N listens on base_port + N
        #[arg(long, default_value_t = 7000)]
        base_port: u16,
    },
}
