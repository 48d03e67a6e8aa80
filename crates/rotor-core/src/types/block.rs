use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hash::{hash_blake3, Hash};
use crate::serialize;
use crate::types::node_id::NodeId;
use crate::types::transaction::Transaction;

/// Identifier of a block
pub type BlockId = Hash;

/// A block proposed by the leader of a round
///
/// Blocks are immutable once built. `id` commits to every other field, so a
/// block decoded from the wire can be checked with [`Block::verify_id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub proposer: NodeId,
    pub round: u64,
    pub id: BlockId,
    /// Id of the block the proposer processed before this one
    pub prev_id: BlockId,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Id referenced by the first block of the chain
    pub const GENESIS_ID: BlockId = Hash::ZERO;

    /// Create a new block
    pub fn new(
        proposer: NodeId,
        round: u64,
        prev_id: BlockId,
        transactions: Vec<Transaction>,
    ) -> Result<Self, CoreError> {
        let id = Self::compute_id(proposer, round, &prev_id, &transactions)?;
        Ok(Block {
            proposer,
            round,
            id,
            prev_id,
            transactions,
        })
    }

    fn compute_id(
        proposer: NodeId,
        round: u64,
        prev_id: &BlockId,
        transactions: &[Transaction],
    ) -> Result<BlockId, CoreError> {
        let bytes = serialize::to_bytes(&(proposer, round, prev_id, transactions))?;
        Ok(hash_blake3(&bytes))
    }

    /// Check that `id` and every transaction id match the block contents
    pub fn verify_id(&self) -> Result<bool, CoreError> {
        if !self.transactions.iter().all(Transaction::verify_id) {
            return Ok(false);
        }
        let computed = Self::compute_id(self.proposer, self.round, &self.prev_id, &self.transactions)?;
        Ok(computed == self.id)
    }

    /// Render the block as human-readable text, one JSON line per element
    pub fn to_lines(&self) -> Result<Vec<String>, CoreError> {
        let text = serialize::to_json_pretty(self)?;
        Ok(text.lines().map(str::to_owned).collect())
    }

    /// Parse a block from the text produced by [`Block::to_lines`]
    pub fn from_lines(lines: &[String]) -> Result<Self, CoreError> {
        if lines.is_empty() {
            return Err(CoreError::Deserialization("empty payload".to_string()));
        }
        serialize::from_json(&lines.join("\n"))
    }
}
