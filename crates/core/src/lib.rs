pub mod config;
pub mod error;
pub mod event;
pub mod jid;

pub use error::{NatterError, Result};
pub use event::{
    IncomingMessage, LogLevel, MessageFlags, MessageKind, RosterChange, SessionObserver, Status,
};
