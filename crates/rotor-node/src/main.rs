use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use rotor_core::NodeId;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;
mod config;
mod node;

use cli::{Cli, Commands};
use config::{generate_sample_config, NodeConfig};
use node::Node;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run { config, id } => {
            run_node(config, id).await?;
        }
        Commands::Init {
            output,
            nodes,
            id,
            base_port,
        } => {
            init_config(output, nodes, id, base_port)?;
        }
    }

    Ok(())
}

/// Run a Rotor node
async fn run_node(config_path: PathBuf, id: Option<NodeId>) -> Result<()> {
    info!("Loading configuration from {:?}", config_path);

    let mut config = if config_path.exists() {
        NodeConfig::load(&config_path)?
    } else {
        error!(
            "Configuration file not found: {:?}. Run 'rotor init' to create one.",
            config_path
        );
        return Err(anyhow::anyhow!("Configuration file not found"));
    };

    if let Some(id) = id {
        config.node_id = id;
    }

    let node = Node::new(config)?;
    node.run().await?;

    Ok(())
}

/// Initialize a new configuration file
fn init_config(output: PathBuf, nodes: u32, id: NodeId, base_port: u16) -> Result<()> {
    info!("Generating sample configuration for {} nodes", nodes);

    let config = generate_sample_config(nodes, id, base_port);
    config.save(&output)?;

    info!("Configuration saved to {:?}", output);

    println!("\nConfiguration file created: {}", output.display());
    println!("Every node can share this file; pass --id to pick the node.");
    println!("\nTo start the network, run in separate terminals:");
    for n in 0..nodes {
        println!("  rotor run --config {} --id {}", output.display(), n);
    }

    Ok(())
}
