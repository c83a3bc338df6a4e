use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use natter_core::config::{Config, SubscriptionPolicy};
use natter_core::jid::{self, BareJid, Jid};
use natter_core::{LogLevel, MessageKind, RosterChange, SessionObserver, Status};
use natter_roster::{Roster, RosterKind};

use crate::connection::{AuthPhase, ConnectionManager, SessionState};
use crate::dispatch::{self, SessionSignal};
use crate::error::{ConnectionError, SessionError};
use crate::framing::StreamEvent;
use crate::iq::{AGENT_LIST_ID, HandlerKind, ROSTER_ID, RequestRegistry};
use crate::processors::HandlerContext;
use crate::processors::info::InfoQuery;
use crate::stanza::{IqType, StanzaNode, ns};
use crate::storage::{Bookmark, PrivateStorage, StorageNamespace};
use crate::transport::{ConnectionConfig, XmppTransport};

/// Account and behaviour settings the handlers consult.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Own bare JID.
    pub jid: BareJid,
    pub resource: String,
    pub priority: i8,
    pub subscription_policy: SubscriptionPolicy,
    pub muc_nickname: Option<String>,
    pub default_status_message: Option<String>,
    pub fetch_private_storage: bool,
    pub keepalive_interval: Duration,
    pub request_timeout: Option<Duration>,
}

impl SessionSettings {
    pub fn new(own_jid: BareJid) -> Self {
        Self {
            jid: own_jid,
            resource: "natter".to_string(),
            priority: 0,
            subscription_policy: SubscriptionPolicy::AcceptAll,
            muc_nickname: None,
            default_status_message: None,
            fetch_private_storage: true,
            keepalive_interval: Duration::from_secs(40),
            request_timeout: None,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConnectionError> {
        Ok(Self {
            jid: jid::bare(&config.account.jid)?,
            resource: config.account.resource.clone(),
            priority: config.account.priority,
            subscription_policy: config.session.subscription_policy,
            muc_nickname: config.muc.nickname.clone(),
            default_status_message: config.status.default_message.clone(),
            fetch_private_storage: config.session.fetch_private_storage,
            keepalive_interval: Duration::from_secs(config.session.keepalive_seconds),
            request_timeout: config
                .session
                .request_timeout_seconds
                .map(Duration::from_secs),
        })
    }

    /// Room nickname when none is given: the configured one, else the node
    /// part of the own JID.
    pub fn default_nickname(&self) -> &str {
        self.muc_nickname
            .as_deref()
            .filter(|nickname| !nickname.is_empty())
            .unwrap_or_else(|| jid::node_or_bare(&self.jid))
    }
}

/// One account's connection, roster and protocol state.
///
/// Everything runs on the caller's task: `poll` reads at most once, handles
/// every complete stanza, then writes whatever the handlers queued.
pub struct Session<T, O>
where
    T: XmppTransport,
    O: SessionObserver,
{
    connection: ConnectionManager<T>,
    registry: RequestRegistry,
    roster: Roster,
    storage: PrivateStorage,
    settings: SessionSettings,
    observer: O,
    outbox: Vec<StanzaNode>,
    own_status: Status,
    own_message: Option<String>,
    roster_loaded: bool,
    disconnect_cause: Option<String>,
}

impl<T, O> Session<T, O>
where
    T: XmppTransport,
    O: SessionObserver,
{
    /// Fails only when the configured account JID is malformed.
    pub fn new(config: &Config, observer: O) -> Result<Self, ConnectionError> {
        Ok(Self::with_settings(
            ConnectionConfig::from_config(config)?,
            SessionSettings::from_config(config)?,
            observer,
        ))
    }

    pub fn with_settings(connection: ConnectionConfig, settings: SessionSettings, observer: O) -> Self {
        Self {
            connection: ConnectionManager::new(connection, settings.keepalive_interval),
            registry: RequestRegistry::new(),
            roster: Roster::new(),
            storage: PrivateStorage::new(),
            settings,
            observer,
            outbox: Vec::new(),
            own_status: Status::Offline,
            own_message: None,
            roster_loaded: false,
            disconnect_cause: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.connection.state()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn storage(&self) -> &PrivateStorage {
        &self.storage
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn pending_requests(&self) -> &RequestRegistry {
        &self.registry
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn own_status(&self) -> Status {
        self.own_status
    }

    pub fn own_message(&self) -> Option<&str> {
        self.own_message.as_deref()
    }

    /// Opens the connection and starts the login. An existing connection is
    /// torn down first.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.state() != SessionState::Disconnected {
            self.disconnect().await;
        }

        self.observer
            .log(LogLevel::Normal, "[Jabber] Connecting to the server");
        info!(jid = %self.settings.jid, host = %self.connection.config().host(), "connecting");

        if let Err(error) = self.connection.connect().await {
            warn!(%error, "connection failed");
            self.connection_lost(&error.to_string());
            return Err(error);
        }
        Ok(())
    }

    /// Announces unavailability when online, then closes the stream.
    pub async fn disconnect(&mut self) {
        if self.state().is_established() {
            let mut unavailable = StanzaNode::presence();
            unavailable.set_attr("type", "unavailable");
            if let Err(error) = self.connection.send(&unavailable).await {
                debug!(%error, "could not announce unavailability");
            }
        }
        self.drop_connection("disconnected").await;
    }

    /// One turn of the session loop. Never waits longer than `timeout` for
    /// input; transport failures end in `Disconnected`.
    pub async fn poll(&mut self, timeout: Duration) -> SessionState {
        if self.state() == SessionState::Disconnected {
            return SessionState::Disconnected;
        }

        match self.connection.poll(timeout).await {
            Ok(events) => {
                for event in events {
                    self.handle_event(event);
                    if self.disconnect_cause.is_some() {
                        break;
                    }
                }
            }
            Err(error) => {
                warn!(%error, "connection lost");
                self.drop_connection(&error.to_string()).await;
                return self.state();
            }
        }

        self.flush().await;

        match self.connection.keepalive_if_due(Instant::now()).await {
            Ok(_) => {}
            Err(error) => {
                self.drop_connection(&error.to_string()).await;
                return self.state();
            }
        }

        self.expire_requests().await;
        self.state()
    }

    fn handle_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Opened { id } => {
                debug!(id = ?id, "stream opened");
                self.begin_authentication();
            }
            StreamEvent::Stanza(stanza) => self.handle_stanza(&stanza),
            StreamEvent::Closed => {
                self.disconnect_cause = Some("stream closed by server".to_string());
            }
        }
    }

    /// Dispatches one stanza. Outgoing replies are queued until `flush`.
    pub fn handle_stanza(&mut self, stanza: &StanzaNode) {
        if self.state() == SessionState::Disconnected {
            debug!(name = stanza.name(), "dropping stanza while disconnected");
            return;
        }

        let mut ctx = HandlerContext {
            settings: &self.settings,
            roster: &mut self.roster,
            registry: &mut self.registry,
            storage: &mut self.storage,
            observer: &mut self.observer,
            outbox: &mut self.outbox,
        };
        let Some(signal) = dispatch::dispatch(&mut ctx, stanza) else {
            return;
        };

        match signal {
            SessionSignal::AuthStep(response) => self.advance_authentication(&response),
            SessionSignal::AuthFailed(cause) => {
                self.disconnect_cause = Some(format!("authentication failed: {cause}"));
            }
            SessionSignal::RosterLoaded => self.on_roster_loaded(),
            SessionSignal::StreamError(cause) => {
                self.disconnect_cause = Some(format!("stream error: {cause}"));
            }
        }
    }

    /// Writes queued stanzas, then performs any disconnect a handler asked
    /// for.
    pub async fn flush(&mut self) {
        let outgoing = std::mem::take(&mut self.outbox);
        for stanza in &outgoing {
            if let Err(error) = self.connection.send(stanza).await {
                warn!(%error, "failed to send stanza");
                self.drop_connection(&error.to_string()).await;
                return;
            }
        }

        if let Some(cause) = self.disconnect_cause.take() {
            self.drop_connection(&cause).await;
        }
    }

    fn begin_authentication(&mut self) {
        let id = self.registry.register(HandlerKind::LegacyAuthStep, ns::AUTH);
        match self.connection.begin_authentication(&id) {
            Some(query) => {
                self.observer
                    .log(LogLevel::Normal, "[Jabber] Authenticating to the server");
                self.outbox.push(query);
            }
            None => {
                self.registry.resolve(&id);
            }
        }
    }

    fn advance_authentication(&mut self, response: &StanzaNode) {
        match self.connection.state() {
            SessionState::Authenticating(AuthPhase::AwaitingChallenge) => {
                let id = self.registry.register(HandlerKind::LegacyAuthStep, ns::AUTH);
                if let Some((method, answer)) = self.connection.answer_challenge(&id, response) {
                    debug!(?method, "sending credentials");
                    self.outbox.push(answer);
                }
            }
            SessionState::Authenticating(AuthPhase::AwaitingAuthResult) => {
                if self.connection.complete_authentication() {
                    self.on_established();
                }
            }
            state => debug!(?state, "ignoring unexpected login response"),
        }
    }

    fn on_established(&mut self) {
        info!(jid = %self.settings.jid, "session established");
        self.observer.log(
            LogLevel::Normal,
            "[Jabber] Communication with the server established",
        );

        let bootstrap = [
            (AGENT_LIST_ID, HandlerKind::AgentList, ns::AGENTS),
            (ROSTER_ID, HandlerKind::RosterSync, ns::ROSTER),
        ];
        for (id, kind, namespace) in bootstrap {
            if let Err(error) = self.registry.register_labeled(id, kind, namespace) {
                warn!(%error, "bootstrap request already pending");
                continue;
            }
            self.outbox
                .push(StanzaNode::iq_query(IqType::Get, id, None, namespace));
        }
    }

    fn on_roster_loaded(&mut self) {
        if self.roster_loaded {
            return;
        }
        self.roster_loaded = true;

        let message = self.settings.default_status_message.clone();
        let presence = self.status_presence(Status::Available, message.as_deref());
        self.outbox.push(presence);
        self.set_own_status(Status::Available, message);

        if self.settings.fetch_private_storage {
            self.queue_storage_request(StorageNamespace::Bookmarks);
            self.queue_storage_request(StorageNamespace::RosterNotes);
        }
    }

    fn queue_storage_request(&mut self, namespace: StorageNamespace) -> String {
        let id = self
            .registry
            .register(namespace.handler_kind(), namespace.namespace());
        self.outbox.push(namespace.request(&id));
        id
    }

    fn status_presence(&self, status: Status, message: Option<&str>) -> StanzaNode {
        let mut presence = StanzaNode::presence();
        if status == Status::Invisible {
            presence.set_attr("type", "invisible");
        }
        if let Some(show) = status.show() {
            presence.append_child(StanzaNode::new("show")).set_text(show);
        }
        if let Some(message) = message.filter(|message| !message.is_empty()) {
            presence
                .append_child(StanzaNode::new("status"))
                .set_text(message);
        }
        presence
            .append_child(StanzaNode::new("priority"))
            .set_text(self.settings.priority.to_string());
        presence
    }

    fn set_own_status(&mut self, status: Status, message: Option<String>) {
        let old = std::mem::replace(&mut self.own_status, status);
        self.own_message = message;
        self.observer
            .on_my_status_change(old, status, self.own_message.as_deref());
    }

    async fn expire_requests(&mut self) {
        let Some(max_age) = self.settings.request_timeout else {
            return;
        };

        let mut login_expired = false;
        for request in self.registry.expire(Instant::now(), max_age) {
            warn!(id = %request.id, kind = ?request.kind, "request timed out");
            self.observer.log(
                LogLevel::Normal,
                &format!("Request {} ({}) timed out", request.id, request.namespace),
            );
            login_expired |= request.kind == HandlerKind::LegacyAuthStep;
        }

        if login_expired {
            self.drop_connection("authentication timed out").await;
        }
    }

    async fn drop_connection(&mut self, cause: &str) {
        self.outbox.clear();
        self.disconnect_cause = None;
        if self.connection.disconnect().await {
            self.connection_lost(cause);
        }
    }

    /// Local cleanup once the connection is gone. The state has already
    /// moved to `Disconnected`.
    fn connection_lost(&mut self, cause: &str) {
        info!(cause, "disconnected");
        self.registry.clear();
        self.roster.clear();
        self.storage.clear();
        self.outbox.clear();
        self.roster_loaded = false;
        self.own_status = Status::Offline;
        self.own_message = None;

        self.observer.on_roster_change(&RosterChange::Cleared);
        self.observer
            .log(LogLevel::Normal, "[Jabber] Not connected to the server");
        self.observer.on_connection_lost(cause);
    }

    fn ensure_established(&self) -> Result<(), SessionError> {
        if self.state().is_established() {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected.into())
        }
    }

    /// Changes the own presence. `Offline` disconnects.
    pub async fn set_status(
        &mut self,
        status: Status,
        message: Option<&str>,
    ) -> Result<(), SessionError> {
        if status == Status::Offline {
            self.disconnect().await;
            return Ok(());
        }
        self.ensure_established()?;

        let message = message
            .map(str::to_string)
            .or_else(|| self.settings.default_status_message.clone());
        let presence = self.status_presence(status, message.as_deref());
        self.outbox.push(presence);
        self.set_own_status(status, message);
        self.flush().await;
        Ok(())
    }

    pub async fn send_message(
        &mut self,
        to: &str,
        kind: MessageKind,
        body: &str,
    ) -> Result<(), SessionError> {
        self.ensure_established()?;
        parse_address(to)?;
        self.outbox.push(StanzaNode::message(to, kind, body));
        self.flush().await;
        Ok(())
    }

    /// Subscribes to a contact and adds it to the server roster.
    pub async fn add_buddy(
        &mut self,
        contact: &str,
        name: Option<&str>,
        group: Option<&str>,
    ) -> Result<(), SessionError> {
        self.ensure_established()?;
        let contact = contact_jid(contact)?;
        let bare = contact.to_string();

        self.outbox
            .push(StanzaNode::presence_typed(&bare, "subscribe"));
        let mut item = roster_item(&bare);
        if let Some(name) = name {
            item.set_attr("name", name);
        }
        if let Some(group) = group {
            item.append_child(StanzaNode::new("group")).set_text(group);
        }
        self.push_roster_set(item);

        self.roster
            .add_or_update(&contact, name, group, RosterKind::User);
        self.observer
            .on_roster_change(&RosterChange::Updated(bare));
        self.flush().await;
        Ok(())
    }

    /// Unsubscribes from a contact and drops it from the server roster.
    /// Agents are unregistered first.
    pub async fn remove_buddy(&mut self, contact: &str) -> Result<(), SessionError> {
        self.ensure_established()?;
        let bare = contact_jid(contact)?.to_string();

        let is_agent = self
            .roster
            .lookup(&bare)
            .is_some_and(|entry| entry.kind == RosterKind::Agent);
        if is_agent {
            self.observer.log(
                LogLevel::Normal,
                &format!("Unregistering from the {bare} agent"),
            );
            let id = self.registry.allocate_id();
            let mut iq = StanzaNode::iq_query(IqType::Set, &id, Some(&bare), ns::REGISTER);
            if let Some(query) = iq.child_mut("query") {
                query.push_child(StanzaNode::new("remove"));
            }
            self.outbox.push(iq);
        }

        self.outbox
            .push(StanzaNode::presence_typed(&bare, "unsubscribe"));
        let mut item = roster_item(&bare);
        item.set_attr("subscription", "remove");
        self.push_roster_set(item);

        if self.roster.remove(&bare).is_some() {
            self.observer
                .on_roster_change(&RosterChange::Removed(bare));
        }
        self.flush().await;
        Ok(())
    }

    /// Renames or regroups a contact on the server roster.
    pub async fn update_buddy(
        &mut self,
        contact: &str,
        name: &str,
        group: Option<&str>,
    ) -> Result<(), SessionError> {
        self.ensure_established()?;
        let contact = contact_jid(contact)?;
        let bare = contact.to_string();
        let Some(kind) = self.roster.lookup(&bare).map(|entry| entry.kind) else {
            return Err(SessionError::UnknownContact(bare));
        };

        let mut item = roster_item(&bare);
        item.set_attr("name", name);
        if let Some(group) = group {
            item.append_child(StanzaNode::new("group")).set_text(group);
        }
        self.push_roster_set(item);

        self.roster.add_or_update(&contact, Some(name), group, kind);
        self.observer
            .on_roster_change(&RosterChange::Updated(bare));
        self.flush().await;
        Ok(())
    }

    pub async fn join_room(
        &mut self,
        room: &str,
        nickname: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), SessionError> {
        self.ensure_established()?;
        let room_jid = contact_jid(room)?;
        let room = room_jid.to_string();
        let nickname = nickname
            .filter(|nickname| !nickname.is_empty())
            .unwrap_or_else(|| self.settings.default_nickname())
            .to_string();

        if !self.roster.contains(&room) {
            self.roster.add_or_update(&room_jid, None, None, RosterKind::Room);
            self.observer
                .on_roster_change(&RosterChange::Updated(room.clone()));
        }

        self.outbox
            .push(StanzaNode::muc_join(&room, &nickname, password));
        self.observer.join_room(&room, &nickname, password);
        self.flush().await;
        Ok(())
    }

    /// Asks `contact` for version, time, idle time or vCard. Returns the
    /// request id.
    pub async fn request_info(
        &mut self,
        contact: &str,
        query: InfoQuery,
    ) -> Result<String, SessionError> {
        self.ensure_established()?;
        parse_address(contact)?;
        let id = self
            .registry
            .register(query.handler_kind(), query.namespace());
        self.outbox.push(query.request(&id, contact));
        self.flush().await;
        Ok(id)
    }

    pub async fn request_storage(
        &mut self,
        namespace: StorageNamespace,
    ) -> Result<String, SessionError> {
        self.ensure_established()?;
        let id = self.queue_storage_request(namespace);
        self.flush().await;
        Ok(id)
    }

    pub async fn set_bookmark(&mut self, bookmark: &Bookmark) -> Result<(), SessionError> {
        self.ensure_established()?;
        contact_jid(&bookmark.jid)?;
        let id = self.registry.allocate_id();
        let iq = self
            .storage
            .set_bookmark(&id, bookmark)
            .ok_or(SessionError::StorageNotLoaded(ns::BOOKMARKS))?;
        self.outbox.push(iq);
        self.flush().await;
        Ok(())
    }

    pub async fn remove_bookmark(&mut self, room: &str) -> Result<(), SessionError> {
        self.ensure_established()?;
        let room = contact_jid(room)?;
        if !self.storage.is_loaded(StorageNamespace::Bookmarks) {
            return Err(SessionError::StorageNotLoaded(ns::BOOKMARKS));
        }
        let id = self.registry.allocate_id();
        let iq = self
            .storage
            .remove_bookmark(&id, room.as_str())
            .ok_or_else(|| SessionError::UnknownBookmark(room.to_string()))?;
        self.outbox.push(iq);
        self.flush().await;
        Ok(())
    }

    /// Sets the note attached to `contact`; `None` deletes it.
    pub async fn set_roster_note(
        &mut self,
        contact: &str,
        text: Option<&str>,
    ) -> Result<(), SessionError> {
        self.ensure_established()?;
        let contact = contact_jid(contact)?;
        let id = self.registry.allocate_id();
        let iq = self
            .storage
            .set_roster_note(&id, &contact, text)
            .ok_or(SessionError::StorageNotLoaded(ns::ROSTER_NOTES))?;
        self.outbox.push(iq);
        self.flush().await;
        Ok(())
    }

    fn push_roster_set(&mut self, item: StanzaNode) {
        let id = self.registry.allocate_id();
        let mut iq = StanzaNode::iq_query(IqType::Set, &id, None, ns::ROSTER);
        if let Some(query) = iq.child_mut("query") {
            query.push_child(item);
        }
        self.outbox.push(iq);
    }
}

fn parse_address(value: &str) -> Result<Jid, SessionError> {
    jid::parse(value).map_err(|source| SessionError::InvalidJid {
        jid: value.to_string(),
        source,
    })
}

fn contact_jid(value: &str) -> Result<BareJid, SessionError> {
    Ok(parse_address(value)?.to_bare())
}

fn roster_item(bare: &str) -> StanzaNode {
    let mut item = StanzaNode::new("item");
    item.set_attr("jid", bare);
    item
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_nickname_prefers_configuration() {
        let mut settings = SessionSettings::new(jid::bare("alice@example.com/laptop").unwrap());
        assert_eq!(settings.jid.as_str(), "alice@example.com");
        assert_eq!(settings.default_nickname(), "alice");

        settings.muc_nickname = Some("ally".to_string());
        assert_eq!(settings.default_nickname(), "ally");

        settings.muc_nickname = Some(String::new());
        assert_eq!(settings.default_nickname(), "alice");
    }

    #[test]
    fn settings_follow_config() {
        let config = Config::from_toml(
            "[account]\njid = \"alice@example.com\"\npassword = \"pw\"\npriority = 3\n\
             [session]\nkeepalive_seconds = 0\nrequest_timeout_seconds = 60\nsubscription_policy = \"manual\"\n\
             [muc]\nnickname = \"ally\"\n[status]\ndefault_message = \"here\"\n",
        )
        .unwrap();

        let settings = SessionSettings::from_config(&config).unwrap();
        assert_eq!(settings.priority, 3);
        assert_eq!(settings.keepalive_interval, Duration::ZERO);
        assert_eq!(settings.request_timeout, Some(Duration::from_secs(60)));
        assert_eq!(settings.subscription_policy, SubscriptionPolicy::Manual);
        assert_eq!(settings.default_nickname(), "ally");
        assert_eq!(settings.default_status_message.as_deref(), Some("here"));
    }
}
