use std::sync::Arc;

use anyhow::{Context, Result};
use rotor_consensus::{BlockRecorder, ConsensusDriver, RoundRobin, RoundSummary};
use rotor_mempool::{Mempool, TxGenerator};
use rotor_net::{ConnectionSupervisor, Mailbox, MessageChannel};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::NodeConfig;

/// The Rotor node
pub struct Node {
    config: NodeConfig,
    mempool: Arc<Mempool>,
    recorder: Arc<BlockRecorder>,
}

impl Node {
    /// Create a new node from configuration
    pub fn new(config: NodeConfig) -> Result<Self> {
        // Reject inconsistent peer lists before binding anything
        config.address_table()?;
        config.listen_address()?;

        let mempool = Arc::new(Mempool::new(config.mempool_config()));

        Ok(Node {
            config,
            mempool,
            recorder: Arc::new(BlockRecorder::new()),
        })
    }

    /// Run until the round budget is spent or a shutdown signal arrives
    pub async fn run(self) -> Result<RoundSummary> {
        let id = self.config.node_id;
        info!("Starting Rotor node {}", id);

        let mailbox = Arc::new(Mailbox::new());
        let listen_addr = self.config.listen_address()?;

        // Without a listener the node cannot take part in any round
        let mut supervisor = ConnectionSupervisor::new(listen_addr, mailbox.clone());
        let local_addr = supervisor
            .init()
            .await
            .context("failed to start inbound listener")?;
        let supervisor = supervisor.start()?;
        info!("Node {} listening on {}", id, local_addr);

        let channel = Arc::new(
            MessageChannel::new(id, self.config.address_table()?, mailbox)
                .with_connect_timeout(self.config.connect_timeout()),
        );

        let background = CancellationToken::new();
        let generator = self.config.txgen_config().map(|txgen| {
            TxGenerator::new(txgen, Arc::clone(&self.mempool)).spawn(background.child_token())
        });

        let driver = Arc::new(ConsensusDriver::new(
            id,
            self.config.driver_config(),
            Arc::new(RoundRobin::new(self.config.members())),
            self.recorder.clone(),
            self.mempool.clone(),
            Arc::clone(&channel),
        ));
        let driver_shutdown = driver.shutdown_token();
        let mut consensus = tokio::spawn(driver.run());

        let summary = tokio::select! {
            result = &mut consensus => result?,
            _ = shutdown_signal() => {
                info!("Shutdown signal received");
                driver_shutdown.cancel();
                consensus.await?
            }
        };

        background.cancel();
        if let Some(generator) = generator {
            match generator.await {
                Ok(total) => info!("Generated {} transactions", total),
                Err(e) => warn!("Transaction generator ended abnormally: {}", e),
            }
        }

        let stats = supervisor.stop().await;
        info!(
            "Closed {} inbound sessions ({} accepted in total)",
            stats.removed, stats.added
        );
        channel.close().await;

        info!(
            "Node {} finished at round {} ({} proposed, {} received, {} rejected, {} skipped)",
            id,
            summary.final_round,
            summary.proposed,
            summary.accepted,
            summary.rejected,
            summary.skipped
        );
        Ok(summary)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
