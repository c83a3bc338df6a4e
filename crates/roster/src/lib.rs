use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use natter_core::Status;
use natter_core::jid::{self, BareJid};

/// Group that transport agents are filed under.
pub const AGENTS_GROUP: &str = "Jabber Agents";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RosterKind {
    #[default]
    User,
    Agent,
    Room,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Subscription {
    #[default]
    None,
    To,
    From,
    Both,
}

impl Subscription {
    /// Parses a roster item `subscription` attribute. `remove` is not a
    /// state and yields `None`.
    pub fn from_attr(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Subscription::None),
            "to" => Some(Subscription::To),
            "from" => Some(Subscription::From),
            "both" => Some(Subscription::Both),
            _ => None,
        }
    }
}

/// Which room join/leave notices are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrintStatus {
    #[default]
    Default,
    None,
    InAndOut,
    All,
}

impl PrintStatus {
    /// Case-insensitive parse of `none`, `in_and_out` or `all`. Anything
    /// else keeps the default.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("none") {
            PrintStatus::None
        } else if value.eq_ignore_ascii_case("in_and_out") {
            PrintStatus::InAndOut
        } else if value.eq_ignore_ascii_case("all") {
            PrintStatus::All
        } else {
            PrintStatus::Default
        }
    }

    /// Stored form; `Default` is not written.
    pub fn as_str(self) -> Option<&'static str> {
        match self {
            PrintStatus::Default => None,
            PrintStatus::None => Some("none"),
            PrintStatus::InAndOut => Some("in_and_out"),
            PrintStatus::All => Some("all"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AutoWhois {
    #[default]
    Default,
    Off,
    On,
}

impl AutoWhois {
    /// `1`/`true` enable, `0`/`false` disable, anything else is default.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value == "1" || value.eq_ignore_ascii_case("true") {
            AutoWhois::On
        } else if value == "0" || value.eq_ignore_ascii_case("false") {
            AutoWhois::Off
        } else {
            AutoWhois::Default
        }
    }

    pub fn as_str(self) -> Option<&'static str> {
        match self {
            AutoWhois::Default => None,
            AutoWhois::Off => Some("0"),
            AutoWhois::On => Some("1"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub jid: String,
    pub name: String,
    pub group: Option<String>,
    pub kind: RosterKind,
    pub subscription: Subscription,
    pub status: Status,
    pub status_message: Option<String>,
    pub print_status: PrintStatus,
    pub auto_whois: AutoWhois,
}

impl RosterEntry {
    fn new(jid: &BareJid, kind: RosterKind) -> Self {
        let bare = jid.to_string();
        Self {
            name: bare.clone(),
            jid: bare,
            group: None,
            kind,
            subscription: Subscription::None,
            status: Status::Offline,
            status_message: None,
            print_status: PrintStatus::Default,
            auto_whois: AutoWhois::Default,
        }
    }
}

/// Contacts keyed by normalised bare JID. Lookups with a malformed
/// address find nothing.
#[derive(Debug, Default)]
pub struct Roster {
    entries: BTreeMap<String, RosterEntry>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a contact or updates an existing one. A missing name leaves
    /// an existing name untouched and defaults a new one to the bare JID; a
    /// missing group leaves the existing group untouched.
    pub fn add_or_update(
        &mut self,
        jid: &BareJid,
        name: Option<&str>,
        group: Option<&str>,
        kind: RosterKind,
    ) -> &RosterEntry {
        let entry = self
            .entries
            .entry(jid.to_string())
            .or_insert_with(|| RosterEntry::new(jid, kind));

        entry.kind = kind;
        if let Some(name) = name.filter(|name| !name.is_empty()) {
            entry.name = name.to_string();
        }
        if let Some(group) = group.filter(|group| !group.is_empty()) {
            entry.group = Some(group.to_string());
        }

        debug!(jid = %entry.jid, kind = ?entry.kind, "roster entry updated");
        entry
    }

    pub fn remove(&mut self, jid: &str) -> Option<RosterEntry> {
        let removed = self.entries.remove(&jid::key(jid)?);
        if let Some(entry) = &removed {
            debug!(jid = %entry.jid, "roster entry removed");
        }
        removed
    }

    pub fn lookup(&self, jid: &str) -> Option<&RosterEntry> {
        self.entries.get(&jid::key(jid)?)
    }

    pub fn lookup_mut(&mut self, jid: &str) -> Option<&mut RosterEntry> {
        self.entries.get_mut(&jid::key(jid)?)
    }

    pub fn contains(&self, jid: &str) -> bool {
        self.lookup(jid).is_some()
    }

    /// Stores a new status and returns the previous status and message, or
    /// `None` when the contact is unknown.
    pub fn set_status(
        &mut self,
        jid: &str,
        status: Status,
        message: Option<&str>,
    ) -> Option<(Status, Option<String>)> {
        let entry = self.lookup_mut(jid)?;
        let old_status = std::mem::replace(&mut entry.status, status);
        let old_message = std::mem::replace(&mut entry.status_message, message.map(str::to_string));
        Some((old_status, old_message))
    }

    pub fn set_kind(&mut self, jid: &str, kind: RosterKind) -> bool {
        match self.lookup_mut(jid) {
            Some(entry) => {
                entry.kind = kind;
                true
            }
            None => false,
        }
    }

    pub fn set_subscription(&mut self, jid: &str, subscription: Subscription) -> bool {
        match self.lookup_mut(jid) {
            Some(entry) => {
                entry.subscription = subscription;
                true
            }
            None => false,
        }
    }

    pub fn set_room_policies(
        &mut self,
        jid: &str,
        print_status: PrintStatus,
        auto_whois: AutoWhois,
    ) -> bool {
        match self.lookup_mut(jid) {
            Some(entry) => {
                entry.print_status = print_status;
                entry.auto_whois = auto_whois;
                true
            }
            None => false,
        }
    }

    pub fn entries_of_kind(&self, kind: RosterKind) -> impl Iterator<Item = &RosterEntry> {
        self.entries.values().filter(move |entry| entry.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RosterEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            debug!(count = self.entries.len(), "roster cleared");
        }
        self.entries.clear();
    }
}
