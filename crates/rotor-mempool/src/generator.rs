use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;
use rotor_core::Transaction;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pool::{Mempool, MempoolError};

/// Configuration for synthetic transaction load
#[derive(Debug, Clone)]
pub struct TxGeneratorConfig {
    /// Time between batches
    pub interval: Duration,
    /// Transactions per batch
    pub batch_size: usize,
    /// Length of each random payload
    pub payload_len: usize,
}

impl Default for TxGeneratorConfig {
    fn default() -> Self {
        TxGeneratorConfig {
            interval: Duration::from_millis(500),
            batch_size: 10,
            payload_len: 32,
        }
    }
}

/// Feeds random transactions into a mempool
pub struct TxGenerator {
    config: TxGeneratorConfig,
    mempool: Arc<Mempool>,
}

impl TxGenerator {
    pub fn new(config: TxGeneratorConfig, mempool: Arc<Mempool>) -> Self {
        TxGenerator { config, mempool }
    }

    fn current_timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }

    /// Generate a single random transaction
    pub fn random_transaction(&self) -> Transaction {
        let payload: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.config.payload_len)
            .map(char::from)
            .collect();
        Transaction::new(payload, Self::current_timestamp_ms())
    }

    /// Add one batch, returning how many transactions were accepted
    pub fn fill_batch(&self) -> usize {
        let mut added = 0;
        for _ in 0..self.config.batch_size {
            match self.mempool.add(self.random_transaction()) {
                Ok(_) => added += 1,
                Err(MempoolError::PoolFull) => {
                    warn!("Mempool full, skipping rest of batch");
                    break;
                }
                Err(e) => debug!("Generated transaction rejected: {}", e),
            }
        }
        added
    }

    /// Run until cancelled; the task yields the total number of transactions added
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<u64> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.interval);
            let mut total = 0u64;

            info!(
                "Generating {} transactions every {:?}",
                self.config.batch_size, self.config.interval
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => total += self.fill_batch() as u64,
                }
            }

            debug!("Transaction generator stopped after {} transactions", total);
            total
        })
    }
}
