//! Rotor Core - Shared types and serialization
//!
//! This crate provides node identities, blocks, transactions and the
//! human-readable text form blocks take on the wire.

pub mod error;
pub mod hash;
pub mod serialize;
pub mod types;

pub use error::CoreError;
pub use hash::{hash_blake3, Hash};
pub use types::*;
