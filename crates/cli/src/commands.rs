//! Slash commands read from standard input.

use natter_core::Status;
use natter_xmpp::InfoQuery;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Message { to: String, body: String },
    Status { status: Status, message: Option<String> },
    Join { room: String, nickname: Option<String> },
    Add { jid: String, name: Option<String> },
    Remove { jid: String },
    Rename { jid: String, name: String },
    Info { query: InfoQuery, jid: String },
    Note { jid: String, text: Option<String> },
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("commands start with '/'")]
    NotACommand,

    #[error("unknown command /{0}")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

pub fn parse(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Err(CommandError::NotACommand);
    };
    let (name, args) = split_word(rest);

    match name {
        "msg" => {
            let (to, body) = split_word(args);
            if to.is_empty() || body.is_empty() {
                return Err(CommandError::Usage("/msg <jid> <text>"));
            }
            Ok(Command::Message {
                to: to.to_string(),
                body: body.to_string(),
            })
        }
        "status" => {
            let (word, message) = split_word(args);
            let status = parse_status(word).ok_or(CommandError::Usage(
                "/status <online|away|dnd|na|ffc|invisible|offline> [message]",
            ))?;
            Ok(Command::Status {
                status,
                message: non_empty(message),
            })
        }
        "join" => {
            let (room, nickname) = split_word(args);
            if room.is_empty() {
                return Err(CommandError::Usage("/join <room> [nickname]"));
            }
            Ok(Command::Join {
                room: room.to_string(),
                nickname: non_empty(nickname),
            })
        }
        "add" => {
            let (jid, name) = split_word(args);
            if jid.is_empty() {
                return Err(CommandError::Usage("/add <jid> [name]"));
            }
            Ok(Command::Add {
                jid: jid.to_string(),
                name: non_empty(name),
            })
        }
        "del" => {
            let (jid, _) = split_word(args);
            if jid.is_empty() {
                return Err(CommandError::Usage("/del <jid>"));
            }
            Ok(Command::Remove {
                jid: jid.to_string(),
            })
        }
        "rename" => {
            let (jid, name) = split_word(args);
            if jid.is_empty() || name.is_empty() {
                return Err(CommandError::Usage("/rename <jid> <name>"));
            }
            Ok(Command::Rename {
                jid: jid.to_string(),
                name: name.to_string(),
            })
        }
        "info" => {
            let (kind, jid) = split_word(args);
            let query = match kind {
                "version" => InfoQuery::Version,
                "time" => InfoQuery::Time,
                "last" => InfoQuery::LastActivity,
                "vcard" => InfoQuery::Vcard,
                _ => return Err(CommandError::Usage("/info <version|time|last|vcard> <jid>")),
            };
            if jid.is_empty() {
                return Err(CommandError::Usage("/info <version|time|last|vcard> <jid>"));
            }
            Ok(Command::Info {
                query,
                jid: jid.to_string(),
            })
        }
        "note" => {
            let (jid, text) = split_word(args);
            if jid.is_empty() {
                return Err(CommandError::Usage("/note <jid> [text]"));
            }
            Ok(Command::Note {
                jid: jid.to_string(),
                text: non_empty(text),
            })
        }
        "quit" => Ok(Command::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    }
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}

fn parse_status(word: &str) -> Option<Status> {
    match word {
        "online" | "avail" => Some(Status::Available),
        "away" => Some(Status::Away),
        "dnd" => Some(Status::DoNotDisturb),
        "na" | "xa" => Some(Status::NotAvailable),
        "ffc" | "chat" => Some(Status::FreeForChat),
        "invisible" => Some(Status::Invisible),
        "offline" => Some(Status::Offline),
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Status::from_char(c),
                _ => None,
            }
        }
    }
}
