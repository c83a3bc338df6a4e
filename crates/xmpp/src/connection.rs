use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::auth::{self, AuthMethod, Credentials};
use crate::error::ConnectionError;
use crate::framing::StreamEvent;
use crate::stanza::StanzaNode;
use crate::stream::XmppStream;
pub use crate::transport::ConnectionConfig;
use crate::transport::XmppTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    AwaitingChallenge,
    AwaitingAuthResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating(AuthPhase),
    Established,
}

impl SessionState {
    pub fn is_established(self) -> bool {
        matches!(self, SessionState::Established)
    }
}

/// Connection lifecycle and the legacy login exchange.
///
/// Owns the stream; the session feeds it auth responses and asks it for
/// the stanzas to send next.
pub struct ConnectionManager<T>
where
    T: XmppTransport,
{
    state: SessionState,
    config: ConnectionConfig,
    stream: XmppStream<T>,
}

impl<T> ConnectionManager<T>
where
    T: XmppTransport,
{
    pub fn new(config: ConnectionConfig, keepalive_interval: Duration) -> Self {
        Self {
            state: SessionState::Disconnected,
            config,
            stream: XmppStream::new(keepalive_interval),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream.stream_id()
    }

    /// Opens the transport and writes the stream header. Reconnecting while
    /// connected tears down the previous stream first.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.state = SessionState::Connecting;
        match self.stream.connect(&self.config).await {
            Ok(()) => {
                info!(host = %self.config.host(), "stream header sent");
                Ok(())
            }
            Err(error) => {
                self.state = SessionState::Disconnected;
                Err(error)
            }
        }
    }

    /// The discovery query to send once the server stream opens, if the
    /// connection is waiting for it.
    pub fn begin_authentication(&mut self, query_id: &str) -> Option<StanzaNode> {
        if self.state != SessionState::Connecting {
            debug!(state = ?self.state, "ignoring stream header outside of connect");
            return None;
        }
        self.state = SessionState::Authenticating(AuthPhase::AwaitingChallenge);
        Some(auth::discovery_query(query_id, self.config.username()))
    }

    /// Answers the discovery response with credentials.
    pub fn answer_challenge(
        &mut self,
        query_id: &str,
        response: &StanzaNode,
    ) -> Option<(AuthMethod, StanzaNode)> {
        if self.state != SessionState::Authenticating(AuthPhase::AwaitingChallenge) {
            return None;
        }

        let credentials = Credentials {
            username: self.config.username(),
            password: &self.config.password,
            resource: &self.config.resource,
        };
        let answer = auth::credentials_query(query_id, &credentials, response, self.stream.stream_id());
        self.state = SessionState::Authenticating(AuthPhase::AwaitingAuthResult);
        Some(answer)
    }

    /// Marks the login as accepted. Returns false if no login was pending.
    pub fn complete_authentication(&mut self) -> bool {
        if self.state != SessionState::Authenticating(AuthPhase::AwaitingAuthResult) {
            return false;
        }
        self.state = SessionState::Established;
        true
    }

    /// Closes the stream and moves to `Disconnected`. Returns whether the
    /// state actually changed.
    pub async fn disconnect(&mut self) -> bool {
        self.stream.close().await;
        self.mark_disconnected()
    }

    pub fn mark_disconnected(&mut self) -> bool {
        let changed = self.state != SessionState::Disconnected;
        self.state = SessionState::Disconnected;
        changed
    }

    pub async fn poll(&mut self, timeout: Duration) -> Result<Vec<StreamEvent>, ConnectionError> {
        self.stream.poll(timeout).await
    }

    pub async fn send(&mut self, stanza: &StanzaNode) -> Result<(), ConnectionError> {
        self.stream.send(stanza).await
    }

    pub async fn keepalive_if_due(&mut self, now: Instant) -> Result<bool, ConnectionError> {
        if !self.state.is_established() {
            return Ok(false);
        }
        self.stream.keepalive_if_due(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyTransport;

    impl XmppTransport for DummyTransport {
        async fn connect(_config: &ConnectionConfig) -> Result<Self, ConnectionError> {
            Ok(Self)
        }

        async fn send(&mut self, _data: &[u8]) -> Result<(), ConnectionError> {
            Ok(())
        }

        async fn recv(&mut self) -> Result<Vec<u8>, ConnectionError> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<(), ConnectionError> {
            Ok(())
        }
    }

    struct RefusingTransport;

    impl XmppTransport for RefusingTransport {
        async fn connect(_config: &ConnectionConfig) -> Result<Self, ConnectionError> {
            Err(ConnectionError::DnsResolutionFailed("example.com".to_string()))
        }

        async fn send(&mut self, _data: &[u8]) -> Result<(), ConnectionError> {
            Ok(())
        }

        async fn recv(&mut self) -> Result<Vec<u8>, ConnectionError> {
            Err(ConnectionError::Closed)
        }

        async fn close(&mut self) -> Result<(), ConnectionError> {
            Ok(())
        }
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            jid: natter_core::jid::bare("alice@example.com").unwrap(),
            password: "secret".to_string(),
            resource: "natter".to_string(),
            server: None,
            port: None,
            tls: false,
            timeout_seconds: 5,
        }
    }

    fn auth_response() -> StanzaNode {
        StanzaNode::parse(
            "<iq type='result' id='1'><query xmlns='jabber:iq:auth'><username/><password/><resource/></query></iq>",
        )
        .unwrap()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn walks_through_legacy_login() {
        let mut manager = ConnectionManager::<DummyTransport>::new(config(), Duration::ZERO);
        assert_eq!(manager.state(), SessionState::Disconnected);

        manager.connect().await.unwrap();
        assert_eq!(manager.state(), SessionState::Connecting);

        let query = manager.begin_authentication("1").unwrap();
        assert_eq!(
            query.child("query").and_then(|q| q.child_value("username")),
            Some("alice")
        );
        assert_eq!(
            manager.state(),
            SessionState::Authenticating(AuthPhase::AwaitingChallenge)
        );

        let (method, _) = manager.answer_challenge("2", &auth_response()).unwrap();
        assert_eq!(method, AuthMethod::Plaintext);
        assert_eq!(
            manager.state(),
            SessionState::Authenticating(AuthPhase::AwaitingAuthResult)
        );

        assert!(manager.complete_authentication());
        assert_eq!(manager.state(), SessionState::Established);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn out_of_order_steps_are_ignored() {
        let mut manager = ConnectionManager::<DummyTransport>::new(config(), Duration::ZERO);
        assert!(manager.begin_authentication("1").is_none());
        assert!(manager.answer_challenge("2", &auth_response()).is_none());
        assert!(!manager.complete_authentication());
        assert_eq!(manager.state(), SessionState::Disconnected);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn disconnect_reports_transition_once() {
        let mut manager = ConnectionManager::<DummyTransport>::new(config(), Duration::ZERO);
        manager.connect().await.unwrap();

        assert!(manager.disconnect().await);
        assert!(!manager.disconnect().await);
        assert_eq!(manager.state(), SessionState::Disconnected);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failed_connect_returns_to_disconnected() {
        let mut manager = ConnectionManager::<RefusingTransport>::new(config(), Duration::ZERO);
        let error = manager.connect().await.unwrap_err();

        assert!(matches!(error, ConnectionError::DnsResolutionFailed(_)));
        assert_eq!(manager.state(), SessionState::Disconnected);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn poll_without_stream_reports_not_connected() {
        let mut manager = ConnectionManager::<DummyTransport>::new(config(), Duration::ZERO);
        let error = manager.poll(Duration::from_millis(1)).await.unwrap_err();
        assert!(matches!(error, ConnectionError::NotConnected));
    }
}
