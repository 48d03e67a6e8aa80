use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rotor_core::{Hash, Transaction};
use thiserror::Error;
use tracing::debug;

/// Supplies the transactions a leader puts into its next block
pub trait TransactionSource: Send + Sync {
    fn get_transactions(&self) -> Vec<Transaction>;
}

/// Configuration for the mempool
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Maximum number of transactions in the pool
    pub max_size: usize,
    /// Maximum transactions handed out per block
    pub max_per_block: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            max_size: 10_000,
            max_per_block: 100,
        }
    }
}

#[derive(Default)]
struct PoolInner {
    queue: VecDeque<Transaction>,
    ids: HashSet<Hash>,
}

/// First-in first-out transaction pool
pub struct Mempool {
    config: MempoolConfig,
    inner: Mutex<PoolInner>,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Mempool {
            config,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    fn inner(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a transaction to the pool
    pub fn add(&self, tx: Transaction) -> Result<Hash, MempoolError> {
        let mut inner = self.inner();

        if inner.ids.contains(&tx.id) {
            return Err(MempoolError::AlreadyExists);
        }
        if inner.queue.len() >= self.config.max_size {
            return Err(MempoolError::PoolFull);
        }

        let id = tx.id;
        inner.ids.insert(id);
        inner.queue.push_back(tx);
        debug!("Added transaction {} to mempool", id.short());

        Ok(id)
    }

    /// Remove and return up to `max` of the oldest transactions
    pub fn drain(&self, max: usize) -> Vec<Transaction> {
        let mut inner = self.inner();
        let count = max.min(inner.queue.len());
        let txs: Vec<Transaction> = inner.queue.drain(..count).collect();
        for tx in &txs {
            inner.ids.remove(&tx.id);
        }
        txs
    }

    pub fn contains(&self, id: &Hash) -> bool {
        self.inner().ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TransactionSource for Mempool {
    fn get_transactions(&self) -> Vec<Transaction> {
        self.drain(self.config.max_per_block)
    }
}

#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("Transaction already exists in mempool")]
    AlreadyExists,

    #[error("Mempool is full")]
    PoolFull,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(n: u64) -> Transaction {
        Transaction::new(format!("tx-{}", n), n)
    }

    #[test]
    fn test_add_and_contains() {
        let mempool = Mempool::new(MempoolConfig::default());
        let id = mempool.add(tx(1)).unwrap();
        assert!(mempool.contains(&id));
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mempool = Mempool::new(MempoolConfig::default());
        mempool.add(tx(1)).unwrap();
        assert!(matches!(mempool.add(tx(1)), Err(MempoolError::AlreadyExists)));
    }

    #[test]
    fn test_pool_full() {
        let mempool = Mempool::new(MempoolConfig {
            max_size: 2,
            ..Default::default()
        });
        mempool.add(tx(1)).unwrap();
        mempool.add(tx(2)).unwrap();
        assert!(matches!(mempool.add(tx(3)), Err(MempoolError::PoolFull)));
    }

    #[test]
    fn test_get_transactions_is_fifo_and_bounded() {
        let mempool = Mempool::new(MempoolConfig {
            max_per_block: 2,
            ..Default::default()
        });
        for n in 1..=3 {
            mempool.add(tx(n)).unwrap();
        }

        let block_txs = mempool.get_transactions();
        assert_eq!(block_txs, vec![tx(1), tx(2)]);
        assert_eq!(mempool.len(), 1);
        assert!(!mempool.contains(&tx(1).id));

        // A drained transaction may be resubmitted
        mempool.add(tx(1)).unwrap();
    }

    #[test]
    fn test_empty_pool_yields_empty_block() {
        let mempool = Mempool::new(MempoolConfig::default());
        assert!(mempool.get_transactions().is_empty());
        assert!(mempool.is_empty());
    }
}
