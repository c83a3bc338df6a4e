use tracing::debug;

use natter_core::{RosterChange, jid};
use natter_roster::{RosterKind, Subscription};

use super::HandlerContext;
use crate::stanza::StanzaNode;

/// Applies the items of a `jabber:iq:roster` query, either the full roster
/// result or a server push.
///
/// Items are applied one by one; a contact missing from the query is left
/// alone. `subscription='remove'` deletes the contact.
pub fn apply_roster_query(ctx: &mut HandlerContext<'_>, query: &StanzaNode) {
    for item in query.children_named("item") {
        let Some(item_jid) = item.attr("jid") else {
            debug!("skipping roster item without jid");
            continue;
        };
        let contact = match jid::bare(item_jid) {
            Ok(contact) => contact,
            Err(error) => {
                debug!(jid = %item_jid, %error, "skipping roster item with malformed jid");
                continue;
            }
        };
        let bare = contact.as_str();

        let subscription = item.attr("subscription");
        if subscription == Some("remove") {
            if ctx.roster.remove(bare).is_some() {
                ctx.roster_changed(RosterChange::Removed(bare.to_string()));
            }
            continue;
        }

        let kind = ctx
            .roster
            .lookup(bare)
            .map_or(RosterKind::User, |entry| entry.kind);
        let name = item.attr("name").filter(|name| !name.is_empty()).unwrap_or(bare);
        let group = item.child_value("group");
        ctx.roster.add_or_update(&contact, Some(name), group, kind);

        if let Some(subscription) = subscription.and_then(Subscription::from_attr) {
            ctx.roster.set_subscription(bare, subscription);
        }

        ctx.roster_changed(RosterChange::Updated(bare.to_string()));
    }
}
