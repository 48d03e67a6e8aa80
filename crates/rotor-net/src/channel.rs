use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::SinkExt;
use rotor_core::NodeId;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tokio_util::codec::FramedWrite;
use tracing::{debug, error, info, warn};

use crate::codec::{Envelope, FrameCodec};
use crate::error::NetError;
use crate::mailbox::Mailbox;

/// Network address of every participant, fixed at startup
pub type PeerAddressTable = HashMap<NodeId, String>;

/// Default bound on opening a connection to a peer
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

type Connection = Arc<Mutex<FramedWrite<TcpStream, FrameCodec>>>;

/// Cache entry for one peer. The map lock is only held to find or insert the
/// slot; connecting happens on the slot, so a slow peer blocks only senders
/// to that same peer.
type PeerSlot = Arc<OnceCell<Connection>>;

/// Outcome of sending one payload to every peer
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<NodeId>,
    pub failed: Vec<(NodeId, NetError)>,
}

impl BroadcastReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Peer-addressable messaging with a lazily populated connection cache
pub struct MessageChannel {
    id: NodeId,
    addresses: PeerAddressTable,
    connections: RwLock<HashMap<NodeId, PeerSlot>>,
    inbound: Arc<Mailbox>,
    connect_timeout: Duration,
    closed: AtomicBool,
    opened: AtomicU64,
}

impl MessageChannel {
    pub fn new(id: NodeId, addresses: PeerAddressTable, inbound: Arc<Mailbox>) -> Self {
        MessageChannel {
            id,
            addresses,
            connections: RwLock::new(HashMap::new()),
            inbound,
            connect_timeout: CONNECT_TIMEOUT,
            closed: AtomicBool::new(false),
            opened: AtomicU64::new(0),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.addresses.keys().copied().filter(move |peer| *peer != self.id)
    }

    /// Send one payload to a peer, connecting first if needed.
    ///
    /// Failures are logged here as well as returned; the payload is dropped
    /// and never retried.
    pub async fn send(&self, to: NodeId, lines: &[String]) -> Result<(), NetError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::Closed);
        }

        let connection = match self.connection_for(to).await {
            Ok(connection) => connection,
            Err(NetError::Closed) => return Err(NetError::Closed),
            Err(e) => {
                error!("{} cannot reach {}: {}", self.id, to, e);
                return Err(e);
            }
        };

        let result = {
            let mut sink = connection.lock().await;
            sink.send(Envelope::new(lines.to_vec())).await
        };

        if let Err(e) = result {
            warn!("{} failed to send to {}: {}", self.id, to, e);
            self.evict(to, &connection).await;
            return Err(e);
        }

        Ok(())
    }

    /// Send a payload to every known peer except this node
    pub async fn broadcast(&self, lines: &[String]) -> BroadcastReport {
        let sends = self.peers().map(|peer| async move { (peer, self.send(peer, lines).await) });

        let mut report = BroadcastReport::default();
        for (peer, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered.push(peer),
                Err(e) => report.failed.push((peer, e)),
            }
        }
        report.delivered.sort();

        debug!(
            "{} broadcast reached {}/{} peers",
            self.id,
            report.delivered.len(),
            report.delivered.len() + report.failed.len()
        );
        report
    }

    /// Wait for the next payload addressed to this node
    pub async fn recv(&self) -> Vec<String> {
        self.inbound.take().await
    }

    /// Release every cached connection. Safe to call more than once.
    pub async fn close(&self) {
        let already_closed = self.closed.swap(true, Ordering::AcqRel);

        let drained: Vec<(NodeId, PeerSlot)> = self.connections.write().await.drain().collect();
        for (peer, slot) in drained {
            let Some(connection) = slot.get() else {
                continue;
            };
            let mut sink = connection.lock().await;
            if let Err(e) = SinkExt::<Envelope>::close(&mut *sink).await {
                debug!("Error closing connection to {}: {}", peer, e);
            }
        }

        if !already_closed {
            info!("{} message channel closed", self.id);
        }
    }

    /// Number of cached outbound connections
    pub async fn connection_count(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Number of outbound connections opened over the channel's lifetime
    pub fn connections_opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    async fn slot_for(&self, to: NodeId) -> Result<PeerSlot, NetError> {
        if let Some(slot) = self.connections.read().await.get(&to) {
            return Ok(Arc::clone(slot));
        }

        let mut connections = self.connections.write().await;

        // close() may have drained the map while we waited for the write lock
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::Closed);
        }
        Ok(Arc::clone(connections.entry(to).or_default()))
    }

    async fn connection_for(&self, to: NodeId) -> Result<Connection, NetError> {
        let addr = self.addresses.get(&to).ok_or(NetError::UnknownPeer(to))?;
        let slot = self.slot_for(to).await?;

        // Concurrent first contacts wait on the same cell; only one connects
        let connection = slot
            .get_or_try_init(|| self.connect(to, addr))
            .await
            .map(Arc::clone)?;

        // A slot orphaned by close() must not hand out a live connection
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::Closed);
        }
        Ok(connection)
    }

    async fn connect(&self, to: NodeId, addr: &str) -> Result<Connection, NetError> {
        let connect_error = |source: io::Error| NetError::Connect {
            peer: to,
            addr: addr.to_string(),
            source,
        };

        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(connect_error(source)),
            Err(_) => {
                return Err(connect_error(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no connection after {:?}", self.connect_timeout),
                )))
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {}: {}", to, e);
        }

        self.opened.fetch_add(1, Ordering::Relaxed);
        debug!("{} connected to {} at {}", self.id, to, addr);
        Ok(Arc::new(Mutex::new(FramedWrite::new(stream, FrameCodec::new()))))
    }

    /// Drop a broken connection unless it has already been replaced
    async fn evict(&self, to: NodeId, broken: &Connection) {
        let mut connections = self.connections.write().await;
        if connections
            .get(&to)
            .and_then(|slot| slot.get())
            .is_some_and(|current| Arc::ptr_eq(current, broken))
        {
            connections.remove(&to);
        }
    }
}
