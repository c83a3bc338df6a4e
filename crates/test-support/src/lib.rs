pub mod fixtures {
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};

    pub fn root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("tests")
            .join("fixtures")
    }

    pub fn path(relative: impl AsRef<Path>) -> PathBuf {
        root().join(relative.as_ref())
    }

    pub fn read(relative: impl AsRef<Path>) -> io::Result<String> {
        fs::read_to_string(path(relative))
    }

    pub fn stanza(name: &str) -> String {
        read_or_panic(Path::new("stanzas").join(name))
    }

    pub fn config(name: &str) -> String {
        read_or_panic(Path::new("config").join(name))
    }

    fn read_or_panic(relative: impl AsRef<Path>) -> String {
        let relative = relative.as_ref();
        read(relative).unwrap_or_else(|error| {
            panic!(
                "failed to read fixture {}: {error}",
                relative.to_string_lossy()
            )
        })
    }
}

pub mod observer {
    use natter_core::{IncomingMessage, LogLevel, RosterChange, SessionObserver, Status};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct StatusChange {
        pub jid: String,
        pub old: Status,
        pub new: Status,
        pub message: Option<String>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RoomJoin {
        pub room: String,
        pub nickname: String,
        pub password: Option<String>,
    }

    /// Records every callback so tests can assert on them afterwards.
    #[derive(Debug, Default)]
    pub struct RecordingObserver {
        pub logs: Vec<(LogLevel, String)>,
        pub messages: Vec<IncomingMessage>,
        pub status_changes: Vec<StatusChange>,
        pub my_status_changes: Vec<StatusChange>,
        pub joined_rooms: Vec<RoomJoin>,
        pub roster_changes: Vec<RosterChange>,
        pub connection_lost: Vec<String>,
    }

    impl RecordingObserver {
        pub fn new() -> Self {
            Self::default()
        }

        /// Whether any log line contains `needle`.
        pub fn logged(&self, needle: &str) -> bool {
            self.logs.iter().any(|(_, line)| line.contains(needle))
        }

        pub fn log_lines(&self) -> Vec<&str> {
            self.logs.iter().map(|(_, line)| line.as_str()).collect()
        }

        pub fn count_logged(&self, needle: &str) -> usize {
            self.logs
                .iter()
                .filter(|(_, line)| line.contains(needle))
                .count()
        }

        pub fn clear(&mut self) {
            *self = Self::default();
        }
    }

    impl SessionObserver for RecordingObserver {
        fn log(&mut self, level: LogLevel, message: &str) {
            self.logs.push((level, message.to_string()));
        }

        fn display_incoming_message(&mut self, message: &IncomingMessage) {
            self.messages.push(message.clone());
        }

        fn on_status_change(&mut self, jid: &str, old: Status, new: Status, message: Option<&str>) {
            self.status_changes.push(StatusChange {
                jid: jid.to_string(),
                old,
                new,
                message: message.map(str::to_string),
            });
        }

        fn on_my_status_change(&mut self, old: Status, new: Status, message: Option<&str>) {
            self.my_status_changes.push(StatusChange {
                jid: String::new(),
                old,
                new,
                message: message.map(str::to_string),
            });
        }

        fn join_room(&mut self, room: &str, nickname: &str, password: Option<&str>) {
            self.joined_rooms.push(RoomJoin {
                room: room.to_string(),
                nickname: nickname.to_string(),
                password: password.map(str::to_string),
            });
        }

        fn on_roster_change(&mut self, change: &RosterChange) {
            self.roster_changes.push(change.clone());
        }

        fn on_connection_lost(&mut self, cause: &str) {
            self.connection_lost.push(cause.to_string());
        }
    }
}

pub use observer::{RecordingObserver, RoomJoin, StatusChange};
