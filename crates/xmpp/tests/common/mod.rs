//! Scripted in-memory server for session tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use natter_test_support::{RecordingObserver, fixtures};
use natter_xmpp::{
    AuthPhase, ConnectionConfig, ConnectionError, Session, SessionSettings, SessionState, StanzaNode,
    XmppTransport,
};

/// Poll timeout used by the tests. Runtimes are paused, so idle polls
/// return immediately.
pub const TICK: Duration = Duration::from_millis(50);

pub type TestSession = Session<MockTransport, RecordingObserver>;

thread_local! {
    static WIRE: RefCell<Option<Arc<Mutex<Wire>>>> = const { RefCell::new(None) };
}

enum Incoming {
    Bytes(Vec<u8>),
    Hangup,
}

#[derive(Default)]
struct Wire {
    incoming: VecDeque<Incoming>,
    sent: Vec<String>,
    connects: usize,
    refuse_connections: bool,
}

/// Test-side handle on the transport the session will open.
#[derive(Clone)]
pub struct MockServer {
    wire: Arc<Mutex<Wire>>,
}

impl MockServer {
    /// Creates a server that transports opened on this thread connect to.
    pub fn install() -> Self {
        let wire = Arc::new(Mutex::new(Wire::default()));
        WIRE.with(|slot| *slot.borrow_mut() = Some(wire.clone()));
        Self { wire }
    }

    /// Queues one chunk for the next read.
    pub fn push(&self, xml: &str) {
        self.wire
            .lock()
            .unwrap()
            .incoming
            .push_back(Incoming::Bytes(xml.as_bytes().to_vec()));
    }

    /// Queues a fixture stanza with its `{id}` placeholder filled in.
    pub fn push_fixture(&self, name: &str, id: &str) {
        self.push(&fixtures::stanza(name).replace("{id}", id));
    }

    pub fn hang_up(&self) {
        self.wire.lock().unwrap().incoming.push_back(Incoming::Hangup);
    }

    pub fn refuse_connections(&self) {
        self.wire.lock().unwrap().refuse_connections = true;
    }

    pub fn connects(&self) -> usize {
        self.wire.lock().unwrap().connects
    }

    pub fn raw_sent(&self) -> Vec<String> {
        self.wire.lock().unwrap().sent.clone()
    }

    /// Every stanza written so far, without stream framing or keepalives.
    pub fn sent_stanzas(&self) -> Vec<StanzaNode> {
        parse_stanzas(&self.wire.lock().unwrap().sent)
    }

    /// Like `sent_stanzas`, but forgets them afterwards.
    pub fn take_sent_stanzas(&self) -> Vec<StanzaNode> {
        let sent = std::mem::take(&mut self.wire.lock().unwrap().sent);
        parse_stanzas(&sent)
    }

    /// The id of the most recent outgoing iq.
    pub fn last_iq_id(&self) -> String {
        self.sent_stanzas()
            .iter()
            .rev()
            .find(|stanza| stanza.name() == "iq")
            .and_then(|iq| iq.attr("id"))
            .expect("no iq sent yet")
            .to_string()
    }

    /// The id of the latest outgoing iq whose payload has `namespace`.
    /// Private storage requests match on the storage namespace.
    pub fn iq_id_for(&self, namespace: &str) -> String {
        self.sent_stanzas()
            .iter()
            .rev()
            .filter(|stanza| stanza.name() == "iq")
            .find(|iq| payload_namespace(iq) == Some(namespace))
            .and_then(|iq| iq.attr("id"))
            .unwrap_or_else(|| panic!("no iq for {namespace} sent"))
            .to_string()
    }
}

pub fn payload_namespace(iq: &StanzaNode) -> Option<&str> {
    let payload = iq.first_child()?;
    if payload.namespace() == Some("jabber:iq:private") {
        payload.first_child().and_then(StanzaNode::namespace)
    } else {
        payload.namespace()
    }
}

fn parse_stanzas(chunks: &[String]) -> Vec<StanzaNode> {
    chunks
        .iter()
        .map(|chunk| chunk.trim())
        .filter(|chunk| {
            ["<iq", "<presence", "<message"]
                .iter()
                .any(|prefix| chunk.starts_with(prefix))
        })
        .map(|chunk| StanzaNode::parse(chunk).expect("client sent malformed xml"))
        .collect()
}

pub struct MockTransport {
    wire: Arc<Mutex<Wire>>,
}

impl XmppTransport for MockTransport {
    async fn connect(_config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        let wire = WIRE
            .with(|slot| slot.borrow().clone())
            .ok_or(ConnectionError::NotConnected)?;
        let refused = {
            let mut guard = wire.lock().unwrap();
            guard.connects += 1;
            guard.refuse_connections
        };
        if refused {
            return Err(ConnectionError::TransportError(
                "connection refused".to_string(),
            ));
        }
        Ok(Self { wire })
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        let chunk = String::from_utf8_lossy(data).into_owned();
        self.wire.lock().unwrap().sent.push(chunk);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, ConnectionError> {
        let next = self.wire.lock().unwrap().incoming.pop_front();
        match next {
            Some(Incoming::Bytes(bytes)) => Ok(bytes),
            Some(Incoming::Hangup) => Err(ConnectionError::Closed),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

pub fn connection_config() -> ConnectionConfig {
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

pub fn settings() -> SessionSettings {
    let mut settings = SessionSettings::new(natter_core::jid::bare("alice@example.com").unwrap());
    settings.priority = 5;
    settings
}

pub fn session_with(settings: SessionSettings) -> TestSession {
    Session::with_settings(connection_config(), settings, RecordingObserver::new())
}

pub fn session() -> TestSession {
    session_with(settings())
}

/// Connects and walks the legacy login until the session is established.
pub async fn log_in(server: &MockServer, session: &mut TestSession, fields_fixture: &str) {
    session.connect().await.unwrap();
    server.push_fixture("stream-header.xml", "");
    assert_eq!(
        session.poll(TICK).await,
        SessionState::Authenticating(AuthPhase::AwaitingChallenge)
    );

    server.push_fixture(fields_fixture, &server.last_iq_id());
    session.poll(TICK).await;

    server.push_fixture("auth-success.xml", &server.last_iq_id());
    assert_eq!(session.poll(TICK).await, SessionState::Established);
}

/// Logs in and answers the bootstrap roster request.
pub async fn log_in_with_roster(server: &MockServer, session: &mut TestSession) {
    log_in(server, session, "auth-fields-digest.xml").await;
    server.push_fixture("roster-result.xml", "");
    session.poll(TICK).await;
}
