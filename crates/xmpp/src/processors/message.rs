use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

use natter_core::{IncomingMessage, MessageFlags, MessageKind, jid};

use super::HandlerContext;
use crate::stanza::{StanzaNode, ns};

/// Compact legacy delay stamp, e.g. `20020910T23:08:25`.
const LEGACY_STAMP_FORMAT: &str = "%Y%m%dT%H:%M:%S";

/// Compact stamp with an offset, e.g. `20020910T23:08:25+02:00`.
const ZONED_STAMP_FORMAT: &str = "%Y%m%dT%H:%M:%S%#z";

/// Delivers a chat/normal/headline message to its bare-JID conversation.
///
/// Messages without a sender or a body are dropped.
pub fn handle_message(ctx: &mut HandlerContext<'_>, stanza: &StanzaNode) {
    let Some(from) = stanza.attr("from") else {
        debug!("dropping message without sender");
        return;
    };
    let Some(conversation) = jid::key(from) else {
        debug!(from = %from, "dropping message from malformed address");
        return;
    };
    let Some(mut body) = stanza.child_value("body").map(str::to_string) else {
        debug!(from = %from, "dropping message without body");
        return;
    };

    if let Some(subject) = stanza.child_value("subject") {
        body = format!("[{subject}]\n{body}");
    }

    let encrypted_payload = encrypted_payload(stanza).map(str::to_string);
    let timestamp = stanza
        .child("x")
        .and_then(|x| x.attr("stamp"))
        .and_then(parse_timestamp);

    let flags = MessageFlags {
        encrypted: encrypted_payload.is_some(),
        ..MessageFlags::NONE
    };

    let message = IncomingMessage {
        conversation,
        from: Some(from.to_string()),
        text: body,
        kind: MessageKind::from_attr(stanza.attr("type")),
        flags,
        encrypted_payload,
        timestamp,
    };

    debug!(from = %from, kind = ?message.kind, "message received");
    ctx.observer.display_incoming_message(&message);
}

/// The first `<x xmlns='jabber:x:encrypted'>` child carrying a value.
fn encrypted_payload(stanza: &StanzaNode) -> Option<&str> {
    stanza
        .children_named("x")
        .filter(|x| {
            x.namespace()
                .is_some_and(|namespace| namespace.eq_ignore_ascii_case(ns::ENCRYPTED))
        })
        .find_map(StanzaNode::value)
}

/// Parses a delayed-delivery stamp. Compact stamps are UTC unless they
/// carry a `Z` or `±hh:mm` marker; RFC 3339 stamps are accepted as well.
pub fn parse_timestamp(stamp: &str) -> Option<DateTime<Utc>> {
    let stamp = stamp.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(stamp, LEGACY_STAMP_FORMAT) {
        return Some(naive.and_utc());
    }
    if let Some(naive) = stamp
        .strip_suffix(['Z', 'z'])
        .and_then(|utc| NaiveDateTime::parse_from_str(utc, LEGACY_STAMP_FORMAT).ok())
    {
        return Some(naive.and_utc());
    }
    if let Ok(zoned) = DateTime::parse_from_str(stamp, ZONED_STAMP_FORMAT) {
        return Some(zoned.with_timezone(&Utc));
    }
    if let Ok(zoned) = DateTime::parse_from_rfc3339(stamp) {
        return Some(zoned.with_timezone(&Utc));
    }
    debug!(stamp, "unparseable message timestamp");
    None
}
