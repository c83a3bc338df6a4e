use thiserror::Error;

/// The umbrella error type for natter hosts.
#[derive(Error, Debug)]
pub enum NatterError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("XMPP error: {0}")]
    Xmpp(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for natter operations.
pub type Result<T> = std::result::Result<T, NatterError>;
