use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rotor_core::{Block, BlockId, NodeId};
use tracing::debug;

use crate::error::ConsensusError;

/// Applies a block to the node's local state
pub trait BlockProcessor: Send + Sync {
    fn process_block(&self, node: NodeId, block: &Block) -> Result<(), ConsensusError>;
}

/// Summary of a block handed to a [`BlockRecorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedBlock {
    pub round: u64,
    pub id: BlockId,
    pub prev_id: BlockId,
    pub proposer: NodeId,
    pub tx_count: usize,
}

#[derive(Default)]
struct Recorded {
    blocks: Vec<ProcessedBlock>,
    seen: HashSet<BlockId>,
}

/// In-memory processor that logs each block and refuses to process the
/// same block twice
#[derive(Default)]
pub struct BlockRecorder {
    inner: Mutex<Recorded>,
}

impl BlockRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn blocks(&self) -> Vec<ProcessedBlock> {
        self.inner().blocks.clone()
    }

    pub fn len(&self) -> usize {
        self.inner().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<ProcessedBlock> {
        self.inner().blocks.last().cloned()
    }
}

impl BlockProcessor for BlockRecorder {
    fn process_block(&self, node: NodeId, block: &Block) -> Result<(), ConsensusError> {
        let mut inner = self.inner();
        if !inner.seen.insert(block.id) {
            return Err(ConsensusError::Processing(format!(
                "block {} already processed",
                block.id.short()
            )));
        }

        debug!(
            "[{}] processing block from {}, round {}, id: {}, prev: {}",
            node,
            block.proposer,
            block.round,
            block.id.short(),
            block.prev_id.short()
        );

        inner.blocks.push(ProcessedBlock {
            round: block.round,
            id: block.id,
            prev_id: block.prev_id,
            proposer: block.proposer,
            tx_count: block.transactions.len(),
        });
        Ok(())
    }
}
