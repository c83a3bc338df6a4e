use tracing::debug;

use natter_core::{LogLevel, RosterChange, jid};
use natter_roster::{AGENTS_GROUP, RosterKind};

use super::HandlerContext;
use crate::iq::HandlerKind;
use crate::stanza::{IqType, StanzaNode, ns};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentType {
    Groupchat,
    Transport,
    Search,
    Unknown,
}

impl AgentType {
    fn of(agent: &StanzaNode) -> Self {
        if agent.child("groupchat").is_some() {
            AgentType::Groupchat
        } else if agent.child("transport").is_some() {
            AgentType::Transport
        } else if agent.child("search").is_some() {
            AgentType::Search
        } else {
            AgentType::Unknown
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            AgentType::Groupchat => "groupchat",
            AgentType::Transport => "transport",
            AgentType::Search => "search",
            AgentType::Unknown => "unknown",
        }
    }
}

/// Walks a `jabber:iq:agents` result. Transports become roster agents;
/// described agents are logged and probed for search/registration forms.
pub fn apply_agent_list(ctx: &mut HandlerContext<'_>, query: &StanzaNode) {
    for agent in query.children_named("agent") {
        let Some(agent_jid) = agent.attr("jid") else {
            continue;
        };
        let agent_type = AgentType::of(agent);

        let address = match jid::bare(agent_jid) {
            Ok(address) => address,
            Err(error) => {
                debug!(jid = %agent_jid, %error, "skipping agent with malformed jid");
                continue;
            }
        };

        if agent_type == AgentType::Transport {
            ctx.roster
                .add_or_update(&address, None, Some(AGENTS_GROUP), RosterKind::Agent);
            ctx.roster_changed(RosterChange::Updated(address.to_string()));
        }

        let (Some(name), Some(description)) =
            (agent.child_value("name"), agent.child_value("description"))
        else {
            debug!(jid = %agent_jid, "agent without description");
            continue;
        };

        ctx.log(
            LogLevel::Normal,
            &format!(
                "Agent: {agent_jid} / {name} / {description} / type={}",
                agent_type.as_str()
            ),
        );

        if agent_type == AgentType::Search {
            request_agent_info(ctx, agent_jid, ns::SEARCH);
        }
        if agent.child("register").is_some() {
            request_agent_info(ctx, agent_jid, ns::REGISTER);
        }
    }
}

pub fn handle_agent_info(ctx: &mut HandlerContext<'_>, stanza: &StanzaNode) {
    debug!(from = ?stanza.attr("from"), "agent info received");
    ctx.log(LogLevel::Normal, "Got agent info");
}

fn request_agent_info(ctx: &mut HandlerContext<'_>, agent_jid: &str, namespace: &str) {
    let id = ctx.registry.register(HandlerKind::AgentInfo, namespace);
    ctx.send(StanzaNode::iq_query(
        IqType::Get,
        &id,
        Some(agent_jid),
        namespace,
    ));
}
