use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::RegistryError;
use crate::stanza::StanzaNode;

/// Fixed id of the bootstrap agent list request.
pub const AGENT_LIST_ID: &str = "Agent List";
/// Fixed id of the bootstrap roster request.
pub const ROSTER_ID: &str = "Roster";

/// What to do with the response to an outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    RosterSync,
    AgentList,
    AgentInfo,
    VersionInfo,
    TimeInfo,
    LastActivity,
    VcardInfo,
    BookmarksStorage,
    RosterNotesStorage,
    LegacyAuthStep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: String,
    pub namespace: String,
    pub kind: HandlerKind,
    pub issued_at: Instant,
}

/// Outstanding IQ requests keyed by id.
///
/// Generated ids are decimal counters, so they never collide with the fixed
/// textual labels used during bootstrap.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    pending: HashMap<String, PendingRequest>,
    next_id: u64,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request under a fresh id and returns that id.
    pub fn register(&mut self, kind: HandlerKind, namespace: &str) -> String {
        let id = self.allocate_id();
        self.insert(id.clone(), kind, namespace);
        id
    }

    pub fn register_labeled(
        &mut self,
        id: &str,
        kind: HandlerKind,
        namespace: &str,
    ) -> Result<(), RegistryError> {
        if self.pending.contains_key(id) {
            return Err(RegistryError::DuplicateId(id.to_string()));
        }
        self.insert(id.to_string(), kind, namespace);
        Ok(())
    }

    /// A fresh id for a request whose response needs no handling.
    pub fn allocate_id(&mut self) -> String {
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            let id = self.next_id.to_string();
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// Removes and returns the request for `id`. Unknown ids yield `None`.
    pub fn resolve(&mut self, id: &str) -> Option<PendingRequest> {
        self.pending.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops every pending request without running its handler.
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            debug!(count = self.pending.len(), "abandoning pending requests");
        }
        self.pending.clear();
    }

    /// Removes and returns requests issued more than `max_age` before `now`.
    pub fn expire(&mut self, now: Instant, max_age: Duration) -> Vec<PendingRequest> {
        let expired_ids: Vec<String> = self
            .pending
            .values()
            .filter(|request| now.saturating_duration_since(request.issued_at) > max_age)
            .map(|request| request.id.clone())
            .collect();

        let mut expired: Vec<PendingRequest> = expired_ids
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .collect();
        expired.sort_by_key(|request| request.issued_at);
        expired
    }

    fn insert(&mut self, id: String, kind: HandlerKind, namespace: &str) {
        debug!(id = %id, ?kind, namespace, "request registered");
        self.pending.insert(
            id.clone(),
            PendingRequest {
                id,
                namespace: namespace.to_string(),
                kind,
                issued_at: Instant::now(),
            },
        );
    }
}

/// Legacy numeric error codes and their descriptions.
pub fn error_description(code: u16) -> Option<&'static str> {
    let description = match code {
        302 => "Redirect",
        400 => "Bad request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Not Allowed",
        406 => "Not Acceptable",
        407 => "Registration Required",
        408 => "Request Timeout",
        409 => "Conflict",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Remote Server Error",
        503 => "Service Unavailable",
        504 => "Remote Server Timeout",
        _ => return None,
    };
    Some(description)
}

/// The parts of an `<error/>` element worth reporting.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IqError {
    pub code: u16,
    pub description: Option<&'static str>,
    /// Defined condition child such as `item-not-found`.
    pub condition: Option<String>,
    pub text: Option<String>,
    pub error_id: Option<String>,
}

impl IqError {
    pub fn from_stanza(stanza: &StanzaNode) -> Self {
        let Some(error) = stanza.child("error") else {
            return Self::default();
        };

        let code = error
            .attr("code")
            .and_then(|code| code.trim().parse().ok())
            .unwrap_or(0);
        let condition = error
            .children()
            .iter()
            .find(|child| child.name() != "text")
            .map(|child| child.name().to_string());
        let text = error
            .child_value("text")
            .or_else(|| error.text())
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());

        Self {
            code,
            description: error_description(code),
            condition,
            text,
            error_id: error.attr("id").map(str::to_string),
        }
    }

    pub fn is_item_not_found(&self, stanza: &StanzaNode) -> bool {
        self.condition.as_deref() == Some("item-not-found")
            || stanza
                .first_child()
                .is_some_and(|child| child.name() == "item-not-found")
    }
}
