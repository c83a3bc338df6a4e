use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::ConnectionError;
use crate::framing::{StreamEvent, StreamParser};
use crate::stanza::{StanzaNode, ns};
use crate::transport::{ConnectionConfig, XmppTransport};

/// Whitespace written when the link has been idle for a full interval.
pub const KEEPALIVE_PAYLOAD: &[u8] = b"  \t  ";

const STREAM_FOOTER: &[u8] = b"</stream:stream>";

pub fn stream_header(domain: &str) -> String {
    format!(
        "<?xml version='1.0' encoding='UTF-8'?><stream:stream to='{}' xmlns='{}' xmlns:stream='{}'>",
        quick_xml::escape::escape(domain),
        ns::CLIENT,
        ns::STREAM
    )
}

/// Tracks outgoing silence. A zero interval disables keepalives.
#[derive(Debug, Clone)]
pub struct KeepaliveTimer {
    last_activity: Instant,
    interval: Duration,
}

impl KeepaliveTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_activity: Instant::now(),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn reset(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_due(&self, now: Instant) -> bool {
        !self.interval.is_zero() && now.saturating_duration_since(self.last_activity) >= self.interval
    }
}

/// One XMPP stream over a transport: framing on the way in, serialization
/// on the way out.
pub struct XmppStream<T>
where
    T: XmppTransport,
{
    transport: Option<T>,
    parser: StreamParser,
    keepalive: KeepaliveTimer,
    stream_id: Option<String>,
}

impl<T> XmppStream<T>
where
    T: XmppTransport,
{
    pub fn new(keepalive_interval: Duration) -> Self {
        Self {
            transport: None,
            parser: StreamParser::new(),
            keepalive: KeepaliveTimer::new(keepalive_interval),
            stream_id: None,
        }
    }

    /// Opens a fresh transport and writes the stream header. Any previous
    /// transport is closed first.
    pub async fn connect(&mut self, config: &ConnectionConfig) -> Result<(), ConnectionError> {
        self.close().await;

        let transport = T::connect(config).await?;
        self.transport = Some(transport);
        self.send_raw(stream_header(config.domain()).as_bytes())
            .await
            .inspect_err(|_| {
                self.transport = None;
            })
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Id from the server's stream header, once received.
    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    pub fn keepalive(&self) -> &KeepaliveTimer {
        &self.keepalive
    }

    /// Performs at most one read bounded by `timeout` and returns every
    /// complete event buffered so far.
    pub async fn poll(&mut self, timeout: Duration) -> Result<Vec<StreamEvent>, ConnectionError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(ConnectionError::NotConnected);
        };

        match tokio::time::timeout(timeout, transport.recv()).await {
            Ok(Ok(bytes)) => {
                trace!(len = bytes.len(), "received bytes");
                self.parser.feed(&bytes);
            }
            Ok(Err(error)) => return Err(error),
            Err(_) => {}
        }

        let mut events = Vec::new();
        while let Some(event) = self.parser.next_event()? {
            if let StreamEvent::Opened { id } = &event {
                debug!(id = ?id, "server stream opened");
                self.stream_id = id.clone();
            }
            events.push(event);
        }
        Ok(events)
    }

    pub async fn send(&mut self, stanza: &StanzaNode) -> Result<(), ConnectionError> {
        let xml = stanza.to_xml();
        trace!(stanza = %xml, "sending stanza");
        self.send_raw(xml.as_bytes()).await
    }

    pub async fn send_raw(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        let transport = self.transport.as_mut().ok_or(ConnectionError::NotConnected)?;
        transport.send(data).await?;
        self.keepalive.reset();
        Ok(())
    }

    /// Writes a whitespace keepalive if the interval has elapsed.
    pub async fn keepalive_if_due(&mut self, now: Instant) -> Result<bool, ConnectionError> {
        if !self.is_open() || !self.keepalive.is_due(now) {
            return Ok(false);
        }
        debug!("sending keepalive");
        self.send_raw(KEEPALIVE_PAYLOAD).await?;
        Ok(true)
    }

    /// Closes the stream if open. Returns whether a transport was closed.
    pub async fn close(&mut self) -> bool {
        self.parser.reset();
        self.stream_id = None;

        let Some(mut transport) = self.transport.take() else {
            return false;
        };
        if let Err(error) = transport.send(STREAM_FOOTER).await {
            debug!(%error, "failed to write stream footer");
        }
        if let Err(error) = transport.close().await {
            debug!(%error, "failed to close transport");
        }
        true
    }
}
