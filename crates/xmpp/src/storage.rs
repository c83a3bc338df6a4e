//! Private XML storage (`jabber:iq:private`) for bookmarks and roster
//! notes.
//!
//! Each namespace has its own cached `<storage/>` tree. A fetch or a local
//! edit replaces the whole tree; cached trees are never patched in place.

use chrono::Utc;
use tracing::debug;

use natter_core::jid::{self, BareJid};
use natter_core::{LogLevel, RosterChange};
use natter_roster::{AutoWhois, PrintStatus, RosterKind};

use crate::iq::{HandlerKind, IqError};
use crate::processors::HandlerContext;
use crate::stanza::{IqType, StanzaNode, ns};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageNamespace {
    Bookmarks,
    RosterNotes,
}

impl StorageNamespace {
    pub fn namespace(self) -> &'static str {
        match self {
            StorageNamespace::Bookmarks => ns::BOOKMARKS,
            StorageNamespace::RosterNotes => ns::ROSTER_NOTES,
        }
    }

    pub fn handler_kind(self) -> HandlerKind {
        match self {
            StorageNamespace::Bookmarks => HandlerKind::BookmarksStorage,
            StorageNamespace::RosterNotes => HandlerKind::RosterNotesStorage,
        }
    }

    pub fn from_handler_kind(kind: HandlerKind) -> Option<Self> {
        match kind {
            HandlerKind::BookmarksStorage => Some(StorageNamespace::Bookmarks),
            HandlerKind::RosterNotesStorage => Some(StorageNamespace::RosterNotes),
            _ => None,
        }
    }

    /// `<iq type='get'><query xmlns='jabber:iq:private'><storage xmlns=ns/></query></iq>`
    pub fn request(self, id: &str) -> StanzaNode {
        let mut iq = StanzaNode::iq_query(IqType::Get, id, None, ns::PRIVATE);
        if let Some(query) = iq.child_mut("query") {
            query.push_child(self.empty_storage());
        }
        iq
    }

    fn empty_storage(self) -> StanzaNode {
        StanzaNode::with_namespace("storage", self.namespace())
    }
}

/// A `<conference/>` bookmark.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bookmark {
    pub jid: String,
    pub name: Option<String>,
    pub autojoin: bool,
    pub nickname: Option<String>,
    pub password: Option<String>,
    pub print_status: PrintStatus,
    pub auto_whois: AutoWhois,
}

impl Bookmark {
    fn from_conference(conference: &StanzaNode) -> Option<Self> {
        let room = conference.attr("jid")?;
        let autojoin = conference
            .attr("autojoin")
            .is_some_and(|value| value == "1" || value.eq_ignore_ascii_case("true"));

        Some(Self {
            jid: jid::key(room)?,
            name: conference.attr("name").map(str::to_string),
            autojoin,
            nickname: conference
                .child_value("nick")
                .filter(|nick| !nick.is_empty())
                .map(str::to_string),
            password: conference.child_value("password").map(str::to_string),
            print_status: setting(conference, "print_status")
                .map_or(PrintStatus::Default, PrintStatus::parse),
            auto_whois: setting(conference, "autowhois").map_or(AutoWhois::Default, AutoWhois::parse),
        })
    }

    fn to_conference(&self) -> StanzaNode {
        let mut conference = StanzaNode::new("conference");
        conference.set_attr("jid", self.jid.as_str());
        if let Some(name) = &self.name {
            conference.set_attr("name", name.as_str());
        }
        conference.set_attr("autojoin", if self.autojoin { "1" } else { "0" });
        if let Some(auto_whois) = self.auto_whois.as_str() {
            conference.set_attr("autowhois", auto_whois);
        }
        if let Some(nickname) = &self.nickname {
            conference
                .append_child(StanzaNode::new("nick"))
                .set_text(nickname.as_str());
        }
        if let Some(password) = &self.password {
            conference
                .append_child(StanzaNode::new("password"))
                .set_text(password.as_str());
        }
        if let Some(print_status) = self.print_status.as_str() {
            conference
                .append_child(StanzaNode::new("print_status"))
                .set_text(print_status);
        }
        conference
    }
}

/// A roster note (`storage:rosternotes`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterNote {
    pub jid: String,
    pub text: String,
    pub created: Option<String>,
    pub modified: Option<String>,
}

/// Child value first, attribute as fallback.
fn setting<'a>(node: &'a StanzaNode, name: &str) -> Option<&'a str> {
    node.child_value(name).or_else(|| node.attr(name))
}

fn same_jid(node: &StanzaNode, target: &str) -> bool {
    node.attr("jid").is_some_and(|value| jid::same_bare(value, target))
}

#[derive(Debug, Default)]
pub struct PrivateStorage {
    bookmarks: Option<StanzaNode>,
    roster_notes: Option<StanzaNode>,
}

impl PrivateStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached `<storage/>` tree, if it has been fetched.
    pub fn cache(&self, namespace: StorageNamespace) -> Option<&StanzaNode> {
        match namespace {
            StorageNamespace::Bookmarks => self.bookmarks.as_ref(),
            StorageNamespace::RosterNotes => self.roster_notes.as_ref(),
        }
    }

    pub fn is_loaded(&self, namespace: StorageNamespace) -> bool {
        self.cache(namespace).is_some()
    }

    fn replace(&mut self, namespace: StorageNamespace, storage: StanzaNode) {
        let slot = match namespace {
            StorageNamespace::Bookmarks => &mut self.bookmarks,
            StorageNamespace::RosterNotes => &mut self.roster_notes,
        };
        *slot = Some(storage);
    }

    pub fn clear(&mut self) {
        self.bookmarks = None;
        self.roster_notes = None;
    }

    pub fn bookmarks(&self) -> Vec<Bookmark> {
        self.bookmarks
            .iter()
            .flat_map(|storage| storage.children_named("conference"))
            .filter_map(Bookmark::from_conference)
            .collect()
    }

    pub fn roster_note(&self, contact: &str) -> Option<RosterNote> {
        let note = self
            .roster_notes
            .iter()
            .flat_map(|storage| storage.children_named("note"))
            .find(|note| same_jid(note, contact))?;

        Some(RosterNote {
            jid: jid::key(note.attr("jid")?)?,
            text: note.text().unwrap_or_default().to_string(),
            created: note.attr("cdate").map(str::to_string),
            modified: note.attr("mdate").map(str::to_string),
        })
    }

    /// Adds or replaces the bookmark for `bookmark.jid` and returns the
    /// IQ set publishing the new tree. `None` if bookmarks were never
    /// fetched.
    pub fn set_bookmark(&mut self, id: &str, bookmark: &Bookmark) -> Option<StanzaNode> {
        let current = self.bookmarks.as_ref()?;
        let mut storage = rebuild_without(current, StorageNamespace::Bookmarks, "conference", &bookmark.jid);
        storage.push_child(bookmark.to_conference());
        Some(self.publish(id, StorageNamespace::Bookmarks, storage))
    }

    /// Drops the bookmark for `room`. `None` if there is no such bookmark.
    pub fn remove_bookmark(&mut self, id: &str, room: &str) -> Option<StanzaNode> {
        let current = self.bookmarks.as_ref()?;
        let known = current
            .children_named("conference")
            .any(|conference| same_jid(conference, room));
        if !known {
            return None;
        }
        let storage = rebuild_without(current, StorageNamespace::Bookmarks, "conference", room);
        Some(self.publish(id, StorageNamespace::Bookmarks, storage))
    }

    /// Sets, or with `None` deletes, the note attached to `contact`.
    pub fn set_roster_note(
        &mut self,
        id: &str,
        contact: &BareJid,
        text: Option<&str>,
    ) -> Option<StanzaNode> {
        let current = self.roster_notes.as_ref()?;
        let contact = contact.as_str();
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let created = self
            .roster_note(contact)
            .and_then(|note| note.created)
            .unwrap_or_else(|| now.clone());

        let mut storage = rebuild_without(current, StorageNamespace::RosterNotes, "note", contact);
        if let Some(text) = text.filter(|text| !text.is_empty()) {
            let mut note = StanzaNode::new("note");
            note.set_attr("jid", contact)
                .set_attr("cdate", created)
                .set_attr("mdate", now)
                .set_text(text);
            storage.push_child(note);
        }
        Some(self.publish(id, StorageNamespace::RosterNotes, storage))
    }

    fn publish(&mut self, id: &str, namespace: StorageNamespace, storage: StanzaNode) -> StanzaNode {
        let mut iq = StanzaNode::iq_query(IqType::Set, id, None, ns::PRIVATE);
        if let Some(query) = iq.child_mut("query") {
            query.push_child(storage.clone());
        }
        self.replace(namespace, storage);
        iq
    }
}

/// A fresh storage tree holding every child of `current` except the
/// `element` entries whose jid matches `target`.
fn rebuild_without(
    current: &StanzaNode,
    namespace: StorageNamespace,
    element: &str,
    target: &str,
) -> StanzaNode {
    let mut storage = namespace.empty_storage();
    for child in current.children() {
        if child.name() == element && same_jid(child, target) {
            continue;
        }
        storage.push_child(child.clone());
    }
    storage
}

/// Successful private-storage fetch.
pub fn handle_storage_result(
    ctx: &mut HandlerContext<'_>,
    namespace: StorageNamespace,
    stanza: &StanzaNode,
) {
    let Some(storage) = stanza
        .child("query")
        .and_then(|query| query.child("storage"))
    else {
        ctx.log(
            LogLevel::Normal,
            &format!("Invalid IQ:private result! ({})", namespace.namespace()),
        );
        return;
    };

    if namespace == StorageNamespace::Bookmarks {
        for conference in storage.children_named("conference") {
            apply_conference(ctx, conference);
        }
    }

    debug!(namespace = namespace.namespace(), "private storage cached");
    ctx.storage.replace(namespace, storage.clone());
}

/// Handles an error answer to a storage fetch. Returns `true` when the
/// error was consumed, i.e. the storage simply does not exist yet and the
/// cache has been reset to an empty tree.
pub fn handle_storage_error(
    ctx: &mut HandlerContext<'_>,
    namespace: StorageNamespace,
    stanza: &StanzaNode,
) -> bool {
    if !IqError::from_stanza(stanza).is_item_not_found(stanza) {
        return false;
    }
    debug!(namespace = namespace.namespace(), "private storage is empty");
    ctx.storage.replace(namespace, namespace.empty_storage());
    true
}

fn apply_conference(ctx: &mut HandlerContext<'_>, conference: &StanzaNode) {
    let Some(bookmark) = Bookmark::from_conference(conference) else {
        debug!(jid = ?conference.attr("jid"), "skipping bookmark without a valid room");
        return;
    };
    let Ok(room_jid) = jid::bare(&bookmark.jid) else {
        return;
    };
    let room = room_jid.as_str();

    if ctx.roster.contains(room) {
        ctx.roster.set_kind(room, RosterKind::Room);
    } else {
        ctx.roster
            .add_or_update(&room_jid, bookmark.name.as_deref(), None, RosterKind::Room);
    }

    if let Some(entry) = ctx.roster.lookup(room) {
        let print_status = match bookmark.print_status {
            PrintStatus::Default => entry.print_status,
            parsed => parsed,
        };
        let auto_whois = match bookmark.auto_whois {
            AutoWhois::Default => entry.auto_whois,
            parsed => parsed,
        };
        ctx.roster.set_room_policies(room, print_status, auto_whois);
    }
    ctx.roster_changed(RosterChange::Updated(room.to_string()));

    if !bookmark.autojoin {
        return;
    }

    let nickname = bookmark
        .nickname
        .clone()
        .unwrap_or_else(|| ctx.settings.default_nickname().to_string());
    ctx.log(LogLevel::Normal, &format!("Auto-join bookmark <{room}>"));
    ctx.send(StanzaNode::muc_join(
        room,
        &nickname,
        bookmark.password.as_deref(),
    ));
    ctx.observer
        .join_room(room, &nickname, bookmark.password.as_deref());
}
