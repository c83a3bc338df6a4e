use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a user-visible log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogLevel {
    /// Only shown when the host runs with debugging enabled.
    Debug,
    /// Written to the log window and the log file.
    Normal,
    /// Always shown, even when the log window is hidden.
    Always,
}

/// Presence status of a contact or of the local account.
///
/// The variant order matches the compact status characters used by console
/// roster displays (`_oifdna`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    #[default]
    Offline,
    Available,
    Invisible,
    FreeForChat,
    DoNotDisturb,
    NotAvailable,
    Away,
}

impl Status {
    pub const ALL: [Status; 7] = [
        Status::Offline,
        Status::Available,
        Status::Invisible,
        Status::FreeForChat,
        Status::DoNotDisturb,
        Status::NotAvailable,
        Status::Away,
    ];

    /// Single-character form used in compact roster displays.
    pub fn as_char(self) -> char {
        match self {
            Status::Offline => '_',
            Status::Available => 'o',
            Status::Invisible => 'i',
            Status::FreeForChat => 'f',
            Status::DoNotDisturb => 'd',
            Status::NotAvailable => 'n',
            Status::Away => 'a',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_char() == c)
    }

    /// Maps a presence `<show/>` value. Unknown values yield `None`.
    pub fn from_show(show: &str) -> Option<Self> {
        match show {
            "away" => Some(Status::Away),
            "dnd" => Some(Status::DoNotDisturb),
            "chat" => Some(Status::FreeForChat),
            "xa" => Some(Status::NotAvailable),
            _ => None,
        }
    }

    /// The `<show/>` value sent for this status, if it has one.
    pub fn show(self) -> Option<&'static str> {
        match self {
            Status::Away => Some("away"),
            Status::DoNotDisturb => Some("dnd"),
            Status::FreeForChat => Some("chat"),
            Status::NotAvailable => Some("xa"),
            Status::Offline | Status::Available | Status::Invisible => None,
        }
    }

    pub fn is_online(self) -> bool {
        !matches!(self, Status::Offline)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Offline => "offline",
            Status::Available => "online",
            Status::Invisible => "invisible",
            Status::FreeForChat => "free for chat",
            Status::DoNotDisturb => "do not disturb",
            Status::NotAvailable => "not available",
            Status::Away => "away",
        };
        f.write_str(name)
    }
}

/// Message `type` attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    Chat,
    Groupchat,
    #[default]
    Normal,
    Headline,
    Error,
}

impl MessageKind {
    pub fn from_attr(value: Option<&str>) -> Self {
        match value {
            Some("chat") => MessageKind::Chat,
            Some("groupchat") => MessageKind::Groupchat,
            Some("headline") => MessageKind::Headline,
            Some("error") => MessageKind::Error,
            _ => MessageKind::Normal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Chat => "chat",
            MessageKind::Groupchat => "groupchat",
            MessageKind::Normal => "normal",
            MessageKind::Headline => "headline",
            MessageKind::Error => "error",
        }
    }
}

/// Rendering hints attached to a line written into a conversation buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFlags {
    /// Line was produced by the client (info query results), not a contact.
    pub info: bool,
    /// Line continues the previous info block.
    pub continuation: bool,
    /// The stanza carried a legacy encrypted payload.
    pub encrypted: bool,
}

impl MessageFlags {
    pub const NONE: MessageFlags = MessageFlags {
        info: false,
        continuation: false,
        encrypted: false,
    };

    pub const INFO: MessageFlags = MessageFlags {
        info: true,
        continuation: false,
        encrypted: false,
    };

    pub const INFO_CONTINUED: MessageFlags = MessageFlags {
        info: true,
        continuation: true,
        encrypted: false,
    };
}

/// A line destined for a conversation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    /// Bare JID used as the conversation key.
    pub conversation: String,
    /// Full sender address as received, when the line came from a stanza.
    pub from: Option<String>,
    pub text: String,
    pub kind: MessageKind,
    pub flags: MessageFlags,
    /// Legacy `jabber:x:encrypted` payload, if any.
    pub encrypted_payload: Option<String>,
    /// Delayed-delivery timestamp; `None` means "now".
    pub timestamp: Option<DateTime<Utc>>,
}

impl IncomingMessage {
    /// An informational line written by the client into a conversation.
    pub fn info(conversation: impl Into<String>, text: impl Into<String>, flags: MessageFlags) -> Self {
        Self {
            conversation: conversation.into(),
            from: None,
            text: text.into(),
            kind: MessageKind::Normal,
            flags,
            encrypted_payload: None,
            timestamp: None,
        }
    }
}

/// Roster mutations surfaced to UI-facing stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "jid", rename_all = "camelCase")]
pub enum RosterChange {
    Updated(String),
    Removed(String),
    Cleared,
}

/// Narrow notification interface the session engine calls into.
///
/// Every method has a no-op default so hosts implement only the hooks they
/// render.
pub trait SessionObserver {
    fn log(&mut self, _level: LogLevel, _message: &str) {}

    fn display_incoming_message(&mut self, _message: &IncomingMessage) {}

    fn on_status_change(&mut self, _jid: &str, _old: Status, _new: Status, _message: Option<&str>) {
    }

    fn on_my_status_change(&mut self, _old: Status, _new: Status, _message: Option<&str>) {}

    fn join_room(&mut self, _room: &str, _nickname: &str, _password: Option<&str>) {}

    fn on_roster_change(&mut self, _change: &RosterChange) {}

    fn on_connection_lost(&mut self, _cause: &str) {}
}
