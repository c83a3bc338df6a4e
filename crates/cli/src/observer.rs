use chrono::{DateTime, Local, Utc};

use natter_core::{IncomingMessage, LogLevel, RosterChange, SessionObserver, Status};

/// Prints session callbacks as plain console lines.
#[derive(Debug, Default)]
pub struct ConsoleObserver {
    pub show_debug: bool,
}

impl ConsoleObserver {
    pub fn new(show_debug: bool) -> Self {
        Self { show_debug }
    }
}

impl SessionObserver for ConsoleObserver {
    fn log(&mut self, level: LogLevel, message: &str) {
        if level == LogLevel::Debug && !self.show_debug {
            return;
        }
        println!("{}", format_log(Local::now(), message));
    }

    fn display_incoming_message(&mut self, message: &IncomingMessage) {
        println!("{}", format_message(message, Utc::now()));
    }

    fn on_status_change(&mut self, jid: &str, _old: Status, new: Status, message: Option<&str>) {
        println!("{}", format_status(jid, new, message));
    }

    fn on_my_status_change(&mut self, _old: Status, new: Status, message: Option<&str>) {
        println!("{}", format_status("You", new, message));
    }

    fn join_room(&mut self, room: &str, nickname: &str, _password: Option<&str>) {
        println!("Joining {room} as {nickname}");
    }

    fn on_roster_change(&mut self, change: &RosterChange) {
        if let RosterChange::Removed(jid) = change {
            println!("{jid} was removed from the roster");
        }
    }

    fn on_connection_lost(&mut self, cause: &str) {
        println!("Connection lost: {cause}");
    }
}

fn format_log(now: DateTime<Local>, message: &str) -> String {
    format!("{} {message}", now.format("%H:%M:%S"))
}

/// `[HH:MM] <conversation> text`, info lines without the sender and with a
/// continuation marker.
fn format_message(message: &IncomingMessage, now: DateTime<Utc>) -> String {
    let stamp = message.timestamp.unwrap_or(now).format("%H:%M");
    let text = if message.flags.encrypted {
        "[encrypted]"
    } else {
        message.text.as_str()
    };

    if message.flags.continuation {
        format!("[{stamp}]   {text}")
    } else if message.flags.info {
        format!("[{stamp}] *** {text}")
    } else {
        format!("[{stamp}] <{}> {text}", message.conversation)
    }
}

fn format_status(who: &str, status: Status, message: Option<&str>) -> String {
    match message.filter(|message| !message.is_empty()) {
        Some(message) => format!("[{}] {who}: {status} ({message})", status.as_char()),
        None => format!("[{}] {who}: {status}", status.as_char()),
    }
}
