//! Rotor Mempool - Pending transactions
//!
//! This crate provides the transaction pool leaders draw block contents from,
//! and a generator that fills it with synthetic load.

pub mod generator;
pub mod pool;

pub use generator::{TxGenerator, TxGeneratorConfig};
pub use pool::{Mempool, MempoolConfig, MempoolError, TransactionSource};
