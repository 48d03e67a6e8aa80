//! Rotor Consensus - Round-driven block production
//!
//! This crate provides leader election, block building and the driver that
//! proposes blocks on leader rounds and consumes blocks proposed by others.

pub mod block_builder;
pub mod driver;
pub mod election;
pub mod error;
pub mod processor;

pub use block_builder::BlockBuilder;
pub use driver::{ConsensusDriver, DriverConfig, RoundSummary};
pub use election::{Election, RoundRobin};
pub use error::ConsensusError;
pub use processor::{BlockProcessor, BlockRecorder, ProcessedBlock};
