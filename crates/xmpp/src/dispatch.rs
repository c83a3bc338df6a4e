use tracing::{debug, warn};

use natter_core::LogLevel;

use crate::iq::{HandlerKind, IqError, PendingRequest};
use crate::processors::info::{self, InfoQuery};
use crate::processors::{HandlerContext, agents, message, presence, roster};
use crate::stanza::{IqType, StanzaKind, StanzaNode, ns};
use crate::storage::{self, StorageNamespace};

/// Outcomes the session has to act on after a stanza was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    /// Response to a login step; the connection decides what comes next.
    AuthStep(StanzaNode),
    AuthFailed(String),
    /// The bootstrap roster request was answered.
    RosterLoaded,
    /// `<stream:error/>` from the server.
    StreamError(String),
}

/// Routes one top-level element to its handler.
pub fn dispatch(ctx: &mut HandlerContext<'_>, stanza: &StanzaNode) -> Option<SessionSignal> {
    match stanza.kind() {
        StanzaKind::Message => {
            message::handle_message(ctx, stanza);
            None
        }
        StanzaKind::Presence => {
            presence::handle_presence(ctx, stanza);
            None
        }
        StanzaKind::Subscription => {
            presence::handle_subscription(ctx, stanza);
            None
        }
        StanzaKind::Iq => dispatch_iq(ctx, stanza),
        StanzaKind::Other if stanza.name() == "stream:error" => {
            let cause = stream_error_cause(stanza);
            warn!(cause = %cause, "stream error from server");
            Some(SessionSignal::StreamError(cause))
        }
        StanzaKind::Other => {
            debug!(name = stanza.name(), "ignoring unknown element");
            None
        }
    }
}

fn dispatch_iq(ctx: &mut HandlerContext<'_>, stanza: &StanzaNode) -> Option<SessionSignal> {
    let Some(kind) = IqType::from_attr(stanza.attr("type")) else {
        debug!(kind = ?stanza.attr("type"), "ignoring iq with unknown type");
        return None;
    };

    match kind {
        IqType::Result => handle_result(ctx, stanza),
        IqType::Error => handle_error(ctx, stanza),
        IqType::Get | IqType::Set => {
            debug!(
                id = ?stanza.attr("id"),
                from = ?stanza.attr("from"),
                kind = kind.as_str(),
                "ignoring incoming iq request"
            );
            None
        }
    }
}

fn handle_result(ctx: &mut HandlerContext<'_>, stanza: &StanzaNode) -> Option<SessionSignal> {
    let pending = stanza.attr("id").and_then(|id| ctx.registry.resolve(id));
    let Some(PendingRequest { kind, .. }) = pending else {
        handle_unsolicited(ctx, stanza);
        return None;
    };

    debug!(id = ?stanza.attr("id"), ?kind, "iq result");
    match kind {
        HandlerKind::LegacyAuthStep => return Some(SessionSignal::AuthStep(stanza.clone())),
        HandlerKind::RosterSync => {
            if let Some(query) = stanza.child_ns("query", ns::ROSTER) {
                roster::apply_roster_query(ctx, query);
            }
            return Some(SessionSignal::RosterLoaded);
        }
        HandlerKind::AgentList => {
            if let Some(query) = stanza.child_ns("query", ns::AGENTS) {
                agents::apply_agent_list(ctx, query);
            }
        }
        HandlerKind::AgentInfo => agents::handle_agent_info(ctx, stanza),
        HandlerKind::VersionInfo
        | HandlerKind::TimeInfo
        | HandlerKind::LastActivity
        | HandlerKind::VcardInfo => {
            if let Some(query) = InfoQuery::from_handler_kind(kind) {
                info::handle_info_result(ctx, query, stanza);
            }
        }
        HandlerKind::BookmarksStorage | HandlerKind::RosterNotesStorage => {
            if let Some(namespace) = StorageNamespace::from_handler_kind(kind) {
                storage::handle_storage_result(ctx, namespace, stanza);
            }
        }
    }
    None
}

/// Results nobody asked for still carry roster or agent updates.
fn handle_unsolicited(ctx: &mut HandlerContext<'_>, stanza: &StanzaNode) {
    let Some(query) = stanza.child("query") else {
        debug!(id = ?stanza.attr("id"), "dropping unmatched iq result");
        return;
    };
    match query.namespace() {
        Some(ns::ROSTER) => roster::apply_roster_query(ctx, query),
        Some(ns::AGENTS) => agents::apply_agent_list(ctx, query),
        namespace => debug!(id = ?stanza.attr("id"), ?namespace, "dropping unmatched iq result"),
    }
}

fn handle_error(ctx: &mut HandlerContext<'_>, stanza: &StanzaNode) -> Option<SessionSignal> {
    let pending = stanza.attr("id").and_then(|id| ctx.registry.resolve(id));

    let storage_namespace = pending
        .as_ref()
        .and_then(|request| StorageNamespace::from_handler_kind(request.kind));
    if storage_namespace
        .is_some_and(|namespace| storage::handle_storage_error(ctx, namespace, stanza))
    {
        return None;
    }

    let error = IqError::from_stanza(stanza);
    log_iq_error(ctx, &error);

    match pending {
        Some(PendingRequest {
            kind: HandlerKind::LegacyAuthStep,
            ..
        }) => {
            let description = error.description.unwrap_or("authentication rejected");
            let cause = match &error.text {
                Some(text) => format!("{} {description}: {text}", error.code),
                None => format!("{} {description}", error.code),
            };
            Some(SessionSignal::AuthFailed(cause))
        }
        _ => None,
    }
}

fn log_iq_error(ctx: &mut HandlerContext<'_>, error: &IqError) {
    ctx.log(
        LogLevel::Normal,
        &format!(
            "Error code from server: {} {}",
            error.code,
            error.description.unwrap_or_default()
        ),
    );
    if let Some(text) = &error.text {
        ctx.log(LogLevel::Normal, &format!("Server message: {text}"));
    }
    if let Some(id) = &error.error_id {
        ctx.log(LogLevel::Debug, &format!("Error id: {id}"));
    }
}

fn stream_error_cause(stanza: &StanzaNode) -> String {
    stanza
        .child_value("text")
        .or_else(|| stanza.first_child().map(StanzaNode::name))
        .unwrap_or("stream error")
        .to_string()
}
