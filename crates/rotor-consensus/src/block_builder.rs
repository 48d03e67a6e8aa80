use std::sync::Arc;

use rotor_core::{Block, BlockId, NodeId};
use rotor_mempool::TransactionSource;
use tracing::{debug, info};

use crate::error::ConsensusError;

/// Block builder for creating new blocks
pub struct BlockBuilder {
    mempool: Arc<dyn TransactionSource>,
}

impl BlockBuilder {
    pub fn new(mempool: Arc<dyn TransactionSource>) -> Self {
        BlockBuilder { mempool }
    }

    /// Build the block for `round` from pending transactions
    pub fn build(
        &self,
        proposer: NodeId,
        round: u64,
        prev_id: BlockId,
    ) -> Result<Block, ConsensusError> {
        let transactions = self.mempool.get_transactions();
        debug!("Got {} transactions from mempool", transactions.len());

        let block = Block::new(proposer, round, prev_id, transactions)?;

        info!(
            "Built block {} for round {} with {} transactions",
            block.id.short(),
            round,
            block.transactions.len()
        );

        Ok(block)
    }
}
