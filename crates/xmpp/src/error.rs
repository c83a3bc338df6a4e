use thiserror::Error;

use natter_core::jid::JidError;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("DNS resolution failed: {0}")]
    DnsResolutionFailed(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("connection timeout")]
    Timeout,

    #[error("connection closed by server")]
    Closed,

    #[error("not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("invalid account JID: {0}")]
    InvalidJid(#[from] JidError),
}

impl From<std::io::Error> for ConnectionError {
    fn from(error: std::io::Error) -> Self {
        ConnectionError::TransportError(error.to_string())
    }
}

impl From<StanzaError> for ConnectionError {
    fn from(error: StanzaError) -> Self {
        ConnectionError::StreamError(error.to_string())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StanzaError {
    #[error("stanza payload is empty")]
    Empty,

    #[error("stanza is incomplete")]
    Incomplete,

    #[error("invalid UTF-8 in stanza bytes: {0}")]
    InvalidUtf8(String),

    #[error("failed to parse stanza XML: {0}")]
    Parse(String),

    #[error("stream buffer exceeded {limit} bytes without a complete stanza")]
    BufferOverflow { limit: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("request id '{0}' is already pending")]
    DuplicateId(String),
}

/// Failures of user-initiated session actions.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("private storage {0} has not been fetched yet")]
    StorageNotLoaded(&'static str),

    #[error("no bookmark for {0}")]
    UnknownBookmark(String),

    #[error("{0} is not in the roster")]
    UnknownContact(String),

    #[error("invalid address {jid}: {source}")]
    InvalidJid {
        jid: String,
        #[source]
        source: JidError,
    },
}
