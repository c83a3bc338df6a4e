pub mod auth;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod framing;
pub mod iq;
pub mod processors;
pub mod session;
pub mod stanza;
pub mod storage;
pub mod stream;
pub mod transport;

pub use auth::AuthMethod;
pub use connection::{AuthPhase, ConnectionManager, SessionState};
pub use dispatch::{SessionSignal, dispatch};
pub use error::{ConnectionError, RegistryError, SessionError, StanzaError};
pub use framing::{StreamEvent, StreamParser};
pub use iq::{HandlerKind, IqError, PendingRequest, RequestRegistry};
pub use processors::HandlerContext;
pub use processors::info::InfoQuery;
pub use session::{Session, SessionSettings};
pub use stanza::{IqType, StanzaKind, StanzaNode};
pub use storage::{Bookmark, PrivateStorage, RosterNote, StorageNamespace};
pub use stream::XmppStream;
pub use transport::{ConnectionConfig, XmppTransport};

#[cfg(feature = "native")]
pub use transport::TcpTransport;

/// A session over the native TCP/TLS transport.
#[cfg(feature = "native")]
pub type NativeSession<O> = Session<TcpTransport, O>;
