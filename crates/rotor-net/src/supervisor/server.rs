use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::session::Session;
use super::{InboundHandler, Lifecycle, ServerEvent, SessionId, SupervisorStats};
use crate::error::NetError;

/// Listens for inbound connections and supervises one session per connection
pub struct ConnectionSupervisor {
    listen_addr: String,
    state: Lifecycle,
    listener: Option<TcpListener>,
    handler: Arc<dyn InboundHandler>,
}

impl ConnectionSupervisor {
    pub fn new(listen_addr: impl Into<String>, handler: Arc<dyn InboundHandler>) -> Self {
        ConnectionSupervisor {
            listen_addr: listen_addr.into(),
            state: Lifecycle::Created,
            listener: None,
            handler,
        }
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    fn expect_state(&self, expected: Lifecycle) -> Result<(), NetError> {
        if self.state != expected {
            return Err(NetError::InvalidState {
                expected,
                found: self.state,
            });
        }
        Ok(())
    }

    /// Bind the listening socket. Callers treat a bind failure as fatal.
    pub async fn init(&mut self) -> Result<SocketAddr, NetError> {
        self.expect_state(Lifecycle::Created)?;

        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|source| NetError::Bind {
                addr: self.listen_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        self.listener = Some(listener);
        self.state = Lifecycle::Initialized;
        debug!("Supervisor bound to {}", local_addr);

        Ok(local_addr)
    }

    /// Launch the accept loop and the server event loop
    pub fn start(mut self) -> Result<SupervisorHandle, NetError> {
        self.expect_state(Lifecycle::Initialized)?;
        let listener = self.listener.take().ok_or(NetError::InvalidState {
            expected: Lifecycle::Initialized,
            found: Lifecycle::Created,
        })?;
        let local_addr = listener.local_addr()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let accept = tokio::spawn(accept_loop(
            listener,
            events_tx.clone(),
            shutdown.child_token(),
        ));

        let server = ServerLoop {
            sessions: HashMap::new(),
            next_id: 0,
            stats: SupervisorStats::default(),
            handler: self.handler,
            events: events_tx.clone(),
            shutdown: shutdown.clone(),
        };
        let server = tokio::spawn(server.run(events_rx));

        info!("Server started on {}", local_addr);

        Ok(SupervisorHandle {
            local_addr,
            events: events_tx,
            shutdown,
            server: Some(server),
            accept: Some(accept),
        })
    }
}

/// Control handle for a running supervisor
pub struct SupervisorHandle {
    local_addr: SocketAddr,
    events: UnboundedSender<ServerEvent>,
    shutdown: CancellationToken,
    server: Option<JoinHandle<SupervisorStats>>,
    accept: Option<JoinHandle<()>>,
}

impl SupervisorHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Snapshot of the session table
    pub async fn stats(&self) -> Result<SupervisorStats, NetError> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(ServerEvent::Stats { reply })
            .map_err(|_| NetError::SupervisorGone)?;
        rx.await.map_err(|_| NetError::SupervisorGone)
    }

    /// Force a session to close. Closing an unknown or already closed
    /// session is a no-op.
    pub fn close_session(&self, id: SessionId) -> Result<(), NetError> {
        self.events
            .send(ServerEvent::CloseSession { id })
            .map_err(|_| NetError::SupervisorGone)
    }

    /// Stop accepting, close every session and wait until all of them have
    /// released their connection.
    pub async fn stop(mut self) -> SupervisorStats {
        self.shutdown.cancel();

        if let Some(accept) = self.accept.take() {
            if let Err(e) = accept.await {
                warn!("Accept loop ended abnormally: {}", e);
            }
        }

        let stats = match self.server.take() {
            Some(server) => server.await.unwrap_or_else(|e| {
                warn!("Server loop ended abnormally: {}", e);
                SupervisorStats::default()
            }),
            None => SupervisorStats::default(),
        };

        info!("Server on {} stopped", self.local_addr);
        stats
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct SessionEntry {
    peer_addr: SocketAddr,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Owner of the session table
struct ServerLoop {
    sessions: HashMap<SessionId, SessionEntry>,
    next_id: u64,
    stats: SupervisorStats,
    handler: Arc<dyn InboundHandler>,
    events: UnboundedSender<ServerEvent>,
    shutdown: CancellationToken,
}

impl ServerLoop {
    async fn run(mut self, mut events: UnboundedReceiver<ServerEvent>) -> SupervisorStats {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                }
            }
        }

        self.stop_sessions().await;
        self.snapshot()
    }

    fn handle(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::ConnectionAdded { stream, peer_addr } => {
                let id = SessionId(self.next_id);
                self.next_id += 1;

                let stop = self.shutdown.child_token();
                let session = Session::new(
                    id,
                    peer_addr,
                    Arc::clone(&self.handler),
                    self.events.clone(),
                    stop.clone(),
                );
                let task = tokio::spawn(session.run(stream));

                self.sessions.insert(
                    id,
                    SessionEntry {
                        peer_addr,
                        stop,
                        task,
                    },
                );
                self.stats.added += 1;
                trace!("Added {} ({}) to session table", id, peer_addr);
            }
            ServerEvent::ConnectionRemoved { id } => match self.sessions.remove(&id) {
                Some(entry) => {
                    self.stats.removed += 1;
                    trace!("Removed {} ({}) from session table", id, entry.peer_addr);
                }
                None => trace!("{} already removed", id),
            },
            ServerEvent::CloseSession { id } => {
                if let Some(entry) = self.sessions.get(&id) {
                    entry.stop.cancel();
                }
            }
            ServerEvent::Stats { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn snapshot(&self) -> SupervisorStats {
        let mut sessions: Vec<SessionId> = self.sessions.keys().copied().collect();
        sessions.sort();
        SupervisorStats {
            sessions,
            ..self.stats.clone()
        }
    }

    async fn stop_sessions(&mut self) {
        let count = self.sessions.len();
        for (id, entry) in self.sessions.drain() {
            entry.stop.cancel();
            if let Err(e) = entry.task.await {
                warn!("{} ended abnormally: {}", id, e);
            }
            self.stats.removed += 1;
        }
        debug!("Closed {} sessions", count);
    }
}

async fn accept_loop(
    listener: TcpListener,
    events: UnboundedSender<ServerEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    if events.send(ServerEvent::ConnectionAdded { stream, peer_addr }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                    break;
                }
            }
        }
    }
    debug!("Accept loop exited");
}
