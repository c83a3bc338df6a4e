use tracing::debug;

use natter_core::config::SubscriptionPolicy;
use natter_core::{LogLevel, RosterChange, Status, jid};
use natter_roster::RosterKind;

use super::HandlerContext;
use crate::stanza::StanzaNode;

/// Availability presence: records the new status and notifies the observer
/// only when the status or its message actually changed.
pub fn handle_presence(ctx: &mut HandlerContext<'_>, stanza: &StanzaNode) {
    let Some(from) = stanza.attr("from") else {
        debug!("dropping presence without sender");
        return;
    };

    if let Some(kind @ ("error" | "probe")) = stanza.attr("type") {
        debug!(from = %from, kind, "ignoring presence");
        return;
    }

    let contact = match jid::bare(from) {
        Ok(contact) => contact,
        Err(error) => {
            debug!(from = %from, %error, "dropping presence from malformed address");
            return;
        }
    };
    let bare = contact.as_str();
    let status = convert_show(stanza);
    let message = stanza.child_value("status");

    if !ctx.roster.contains(bare) {
        ctx.roster.add_or_update(&contact, None, None, RosterKind::User);
        ctx.roster_changed(RosterChange::Updated(bare.to_string()));
    }

    let Some((old_status, old_message)) = ctx.roster.set_status(bare, status, message) else {
        return;
    };

    if old_status == status && old_message.as_deref() == message {
        debug!(jid = %bare, ?status, "presence unchanged");
        return;
    }

    debug!(jid = %bare, old = ?old_status, new = ?status, "presence changed");
    ctx.observer.on_status_change(bare, old_status, status, message);
}

/// Subscription presences (`subscribe`, `subscribed`, `unsubscribe`,
/// `unsubscribed`).
pub fn handle_subscription(ctx: &mut HandlerContext<'_>, stanza: &StanzaNode) {
    let kind = stanza.attr("type").unwrap_or_default();
    ctx.log(
        LogLevel::Normal,
        &format!("Received (un)subscription packet (type={kind})"),
    );

    let Some(from) = stanza.attr("from") else {
        debug!(kind, "dropping subscription packet without sender");
        return;
    };
    if let Err(error) = jid::parse(from) {
        debug!(from = %from, %error, "dropping subscription packet from malformed address");
        return;
    }

    match kind {
        "subscribe" => {
            let is_agent = ctx
                .roster
                .lookup(from)
                .is_some_and(|entry| entry.kind == RosterKind::Agent);
            if !is_agent {
                ctx.log(
                    LogLevel::Normal,
                    &format!("<{from}> wants to subscribe to your network presence updates"),
                );
            }
            if is_agent || ctx.settings.subscription_policy == SubscriptionPolicy::AcceptAll {
                ctx.send(StanzaNode::presence_typed(from, "subscribed"));
            } else {
                debug!(from = %from, "subscription request left pending");
            }
        }
        "unsubscribe" => {
            ctx.send(StanzaNode::presence_typed(from, "unsubscribed"));
            ctx.log(
                LogLevel::Normal,
                &format!("<{from}> has unsubscribed to your presence updates"),
            );
        }
        "subscribed" => {
            ctx.log(
                LogLevel::Normal,
                &format!("<{from}> has allowed you to receive their presence updates"),
            );
        }
        "unsubscribed" => {
            ctx.log(
                LogLevel::Normal,
                &format!("<{from}> has cancelled your subscription to their presence updates"),
            );
        }
        other => debug!(from = %from, kind = other, "unknown subscription type"),
    }
}

fn convert_show(stanza: &StanzaNode) -> Status {
    if stanza.attr("type") == Some("unavailable") {
        return Status::Offline;
    }
    stanza
        .child_value("show")
        .and_then(|show| Status::from_show(show.trim()))
        .unwrap_or(Status::Available)
}
