use std::io;

use thiserror::Error;

impl From<speedy::Error> for Error {
    fn from(value: speedy::Error) -> Self {
        Self::ProtocolViolation(value.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigError(value.to_string())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Bencode input is not valid: {0}")]
    MalformedInput(String),

    #[error("Bencode input ended before the value was complete")]
    TruncatedInput,

    #[error("The torrent metadata is missing or has a wrong field: {0}")]
    SchemaError(String),

    #[error("The handshake received is not valid, wrong protocol string or info_hash")]
    HandshakeMismatch,

    #[error("The peer broke the wire protocol: {0}")]
    ProtocolViolation(String),

    #[error("The peer took too long to respond")]
    PeerUnresponsive,

    #[error("The piece downloaded does not have a valid hash")]
    HashMismatch,

    #[error("Connection error: {0}")]
    ConnectionError(#[from] io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// A cheap, copyable classification of an [`Error`].
///
/// Sessions keep this in their `Failed` state, since the error itself is
/// handed back to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedInput,
    TruncatedInput,
    SchemaError,
    HandshakeMismatch,
    ProtocolViolation,
    PeerUnresponsive,
    HashMismatch,
    ConnectionError,
    ConfigError,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedInput(_) => ErrorKind::MalformedInput,
            Error::TruncatedInput => ErrorKind::TruncatedInput,
            Error::SchemaError(_) => ErrorKind::SchemaError,
            Error::HandshakeMismatch => ErrorKind::HandshakeMismatch,
            Error::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Error::PeerUnresponsive => ErrorKind::PeerUnresponsive,
            Error::HashMismatch => ErrorKind::HashMismatch,
            Error::ConnectionError(_) => ErrorKind::ConnectionError,
            Error::ConfigError(_) => ErrorKind::ConfigError,
        }
    }
}
