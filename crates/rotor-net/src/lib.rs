//! Rotor Net - Peer messaging and inbound connection supervision
//!
//! Outbound traffic goes through [`MessageChannel`], which lazily opens one
//! connection per peer. Inbound traffic is accepted by a
//! [`ConnectionSupervisor`], whose sessions hand every decoded payload to an
//! [`InboundHandler`] such as the single-slot [`Mailbox`].

pub mod channel;
pub mod codec;
pub mod error;
pub mod mailbox;
pub mod supervisor;

pub use channel::{BroadcastReport, MessageChannel, PeerAddressTable, CONNECT_TIMEOUT};
pub use codec::{Envelope, FrameCodec, MAX_FRAME_LENGTH, PROTOCOL_VERSION};
pub use error::NetError;
pub use mailbox::Mailbox;
pub use supervisor::{
    ConnectionSupervisor, InboundHandler, Lifecycle, SessionId, SupervisorHandle, SupervisorStats,
};
