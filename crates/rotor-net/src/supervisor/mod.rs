//! Supervised inbound connections.
//!
//! The server and each of its sessions move through the same lifecycle:
//! `Created -> Initialized -> Started -> Stopped`. The server event loop is
//! the only owner of the session table; the accept loop and the sessions talk
//! to it through [`ServerEvent`]s processed one at a time.

mod server;
mod session;

use std::fmt;
use std::net::SocketAddr;

use tokio::net::TcpStream;
use tokio::sync::oneshot;

pub use server::{ConnectionSupervisor, SupervisorHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Initialized,
    Started,
    Stopped,
}

/// Identifier of one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Receives every payload decoded by a session
pub trait InboundHandler: Send + Sync + 'static {
    fn on_payload(&self, session: SessionId, lines: Vec<String>);
}

/// Snapshot of the session table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    pub added: u64,
    pub removed: u64,
    pub sessions: Vec<SessionId>,
}

impl SupervisorStats {
    pub fn active(&self) -> usize {
        self.sessions.len()
    }
}

pub(crate) enum ServerEvent {
    ConnectionAdded {
        stream: TcpStream,
        peer_addr: SocketAddr,
    },
    ConnectionRemoved {
        id: SessionId,
    },
    CloseSession {
        id: SessionId,
    },
    Stats {
        reply: oneshot::Sender<SupervisorStats>,
    },
}
