use rotor_core::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("{node} is not the leader of round {round}")]
    NotLeader { node: NodeId, round: u64 },

    #[error("Block for round {got} arrived after round {current} had started")]
    StaleRound { current: u64, got: u64 },

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Block processing failed: {0}")]
    Processing(String),

    #[error("Undecodable payload: {0}")]
    Decode(#[source] rotor_core::CoreError),

    #[error("Core error: {0}")]
    Core(#[from] rotor_core::CoreError),
}
