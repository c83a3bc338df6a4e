//! Synchronous stanza handlers.
//!
//! Handlers never touch the network. Anything they want to send is pushed
//! onto the context outbox and written by the session after dispatch.

pub mod agents;
pub mod info;
pub mod message;
pub mod presence;
pub mod roster;

use natter_core::{LogLevel, RosterChange, SessionObserver};
use natter_roster::Roster;

use crate::iq::RequestRegistry;
use crate::session::SessionSettings;
use crate::stanza::StanzaNode;
use crate::storage::PrivateStorage;

/// Everything a handler may read or mutate while processing one stanza.
pub struct HandlerContext<'a> {
    pub settings: &'a SessionSettings,
    pub roster: &'a mut Roster,
    pub registry: &'a mut RequestRegistry,
    pub storage: &'a mut PrivateStorage,
    pub observer: &'a mut dyn SessionObserver,
    pub outbox: &'a mut Vec<StanzaNode>,
}

impl HandlerContext<'_> {
    pub fn send(&mut self, stanza: StanzaNode) {
        self.outbox.push(stanza);
    }

    pub fn log(&mut self, level: LogLevel, message: &str) {
        self.observer.log(level, message);
    }

    pub fn roster_changed(&mut self, change: RosterChange) {
        self.observer.on_roster_change(&change);
    }
}
