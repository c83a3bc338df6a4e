//! `config.toml`: the account, session behaviour, room and status defaults,
//! and the log level.
//!
//! `NATTER_JID`, `NATTER_PASSWORD`, `NATTER_SERVER` and `NATTER_LOG_LEVEL`
//! take precedence over the file.

use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::jid;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no configuration at {path}; a template has been written there")]
    FileNotFound { path: PathBuf },

    #[error("config.toml line {line}, column {column}: {message}")]
    InvalidToml {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("missing required settings: {}", .fields.join(", "))]
    MissingRequiredFields { fields: Vec<String> },

    #[error("{field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("cannot access configuration: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub muc: MucConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Bare JID; a resource given here is ignored in favour of `resource`.
    pub jid: String,
    pub password: String,
    /// Host to dial instead of the JID's domain.
    pub server: Option<String>,
    pub port: Option<u16>,
    /// Direct TLS (legacy port 5223 by default).
    #[serde(default)]
    pub tls: bool,
    #[serde(default = "AccountConfig::default_resource")]
    pub resource: String,
    #[serde(default)]
    pub priority: i8,
}

impl AccountConfig {
    fn default_resource() -> String {
        "natter".to_string()
    }
}

/// Whether incoming `subscribe` requests are approved without asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriptionPolicy {
    #[default]
    AcceptAll,
    Manual,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds of outgoing silence before a whitespace keepalive; 0 disables.
    pub keepalive_seconds: u64,
    pub connect_timeout_seconds: u64,
    pub subscription_policy: SubscriptionPolicy,
    /// Pending requests older than this are dropped. Unset keeps them
    /// until disconnect.
    pub request_timeout_seconds: Option<u64>,
    /// Fetch bookmarks and roster notes once the roster arrives.
    pub fetch_private_storage: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_seconds: 40,
            connect_timeout_seconds: 30,
            subscription_policy: SubscriptionPolicy::AcceptAll,
            request_timeout_seconds: None,
            fetch_private_storage: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MucConfig {
    /// Room nickname when a bookmark or `/join` names none.
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusConfig {
    pub default_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Written when no configuration exists yet.
const TEMPLATE: &str = r#"[account]
jid = ""
password = ""
# server = "jabber.example.com"
# port = 5222
tls = false
resource = "natter"
priority = 0

[session]
keepalive_seconds = 40
connect_timeout_seconds = 30
# "accept-all" or "manual"
subscription_policy = "accept-all"
# request_timeout_seconds = 120
fetch_private_storage = true

[muc]
# nickname = "natter"

[status]
# default_message = "Using natter"

[logging]
level = "info"
"#;

impl Config {
    /// `config.toml` in the platform configuration directory.
    #[cfg(feature = "native")]
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("im", "natter", "natter").map_or_else(
            || PathBuf::from("config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    /// Reads `path` and applies the environment. A missing file is replaced
    /// by the template and reported as `FileNotFound`, since the account
    /// still has to be filled in.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                write_template(path)?;
                return Err(ConfigError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(error) => return Err(error.into()),
        };
        tracing::debug!(path = %path.display(), "configuration read");
        Self::parse(&text, |name| std::env::var(name).ok())
    }

    /// Parses and validates `text` without looking at the environment.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text, |_| None)
    }

    fn parse(text: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config: Config =
            toml::from_str(text).map_err(|error| invalid_toml(text, &error))?;
        config.apply_env(env);
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(jid) = env("NATTER_JID") {
            self.account.jid = jid;
        }
        if let Some(password) = env("NATTER_PASSWORD") {
            self.account.password = password;
        }
        if let Some(server) = env("NATTER_SERVER") {
            self.account.server = Some(server);
        }
        if let Some(level) = env("NATTER_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let missing: Vec<String> = [
            ("account.jid", self.account.jid.is_empty()),
            ("account.password", self.account.password.is_empty()),
        ]
        .into_iter()
        .filter(|(_, empty)| *empty)
        .map(|(field, _)| field.to_string())
        .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingRequiredFields { fields: missing });
        }

        let own = jid::bare(&self.account.jid).map_err(|error| invalid("account.jid", error))?;
        if own.node().is_none() && self.account.server.is_none() {
            return Err(invalid(
                "account.server",
                "required when account.jid has no node part",
            ));
        }
        if self.account.resource.is_empty() {
            return Err(invalid("account.resource", "must not be empty"));
        }
        if self.session.request_timeout_seconds == Some(0) {
            return Err(invalid(
                "session.request_timeout_seconds",
                "must be greater than zero when set",
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid(
                "logging.level",
                format!("must be one of: {}", LOG_LEVELS.join(", ")),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, message: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Converts the parser's byte span into a 1-based line and column.
fn invalid_toml(text: &str, error: &toml::de::Error) -> ConfigError {
    let offset = error.span().map_or(0, |span| span.start);
    let before = text.get(..offset).unwrap_or(text);
    let line_start = before.rfind('\n').map_or(0, |newline| newline + 1);
    ConfigError::InvalidToml {
        line: before.matches('\n').count() + 1,
        column: before.len() - line_start + 1,
        message: error.message().to_string(),
    }
}

fn write_template(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, TEMPLATE)?;
    tracing::info!(path = %path.display(), "wrote configuration template");
    Ok(())
}
