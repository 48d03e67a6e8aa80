use std::io;

use rotor_core::NodeId;
use thiserror::Error;

use crate::supervisor::Lifecycle;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("No address known for peer {0}")]
    UnknownPeer(NodeId),

    #[error("Failed to connect to {peer} at {addr}: {source}")]
    Connect {
        peer: NodeId,
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection error: {0}")]
    Io(#[from] io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    #[error("Message channel closed")]
    Closed,

    #[error("Invalid lifecycle transition: expected {expected:?}, found {found:?}")]
    InvalidState { expected: Lifecycle, found: Lifecycle },

    #[error("Supervisor is no longer running")]
    SupervisorGone,
}
