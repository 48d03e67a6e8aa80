use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{InboundHandler, Lifecycle, ServerEvent, SessionId};
use crate::codec::{Envelope, FrameCodec};

/// One accepted inbound connection
pub(crate) struct Session {
    id: SessionId,
    peer_addr: SocketAddr,
    state: Lifecycle,
    handler: Arc<dyn InboundHandler>,
    server: UnboundedSender<ServerEvent>,
    stop: CancellationToken,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        peer_addr: SocketAddr,
        handler: Arc<dyn InboundHandler>,
        server: UnboundedSender<ServerEvent>,
        stop: CancellationToken,
    ) -> Self {
        Session {
            id,
            peer_addr,
            state: Lifecycle::Created,
            handler,
            server,
            stop,
        }
    }

    fn transition(&mut self, next: Lifecycle) {
        trace!("{} {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    /// Read frames until the peer goes away or the session is stopped, then
    /// report the removal to the server exactly once.
    pub(crate) async fn run(mut self, stream: TcpStream) {
        self.transition(Lifecycle::Initialized);
        let mut reader = FramedRead::new(stream, FrameCodec::new());

        self.transition(Lifecycle::Started);
        info!("New connection {} from {}", self.id, self.peer_addr);

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    debug!("{} stopped", self.id);
                    break;
                }
                frame = reader.next() => match frame {
                    // Each frame is its own buffer, split off the read buffer
                    Some(Ok(frame)) => match Envelope::from_frame(&frame) {
                        Ok(envelope) => self.handler.on_payload(self.id, envelope.lines),
                        Err(e) => warn!("{} dropped malformed payload: {}", self.id, e),
                    },
                    Some(Err(e)) => {
                        warn!("{} read error: {}", self.id, e);
                        break;
                    }
                    None => {
                        debug!("{} closed by {}", self.id, self.peer_addr);
                        break;
                    }
                }
            }
        }

        drop(reader);
        self.transition(Lifecycle::Stopped);

        // The server may already be gone during shutdown
        let _ = self
            .server
            .send(ServerEvent::ConnectionRemoved { id: self.id });
    }
}
