// src/core/errors.rs

//! Defines the primary error type used across the Warden monitor.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum for the Warden monitor process.
///
/// Transient link/probe failures are not represented here at all — per the error handling
/// design, they are swallowed at the point of occurrence and surfaced only as a freshness
/// timer that stops advancing (see `core::warden::detector`). This enum covers failures that
/// need to propagate up through `?` to a caller that decides what to do about them.
#[derive(Error, Debug, Clone)]
pub enum WardenError {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("read timed out")]
    ReadTimeout,

    #[error("incomplete data in stream")]
    IncompleteData,

    #[error("protocol syntax error")]
    SyntaxError,

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("no such master '{0}'")]
    UnknownMaster(String),

    #[error("script path '{0}' is not an executable file")]
    ScriptNotExecutable(String),
}

impl From<std::io::Error> for WardenError {
    fn from(e: std::io::Error) -> Self {
        WardenError::Io(Arc::new(e))
    }
}

impl From<std::net::AddrParseError> for WardenError {
    fn from(e: std::net::AddrParseError) -> Self {
        WardenError::InvalidAddress(e.to_string())
    }
}

impl From<toml::de::Error> for WardenError {
    fn from(e: toml::de::Error) -> Self {
        WardenError::Config(e.to_string())
    }
}

impl From<std::num::ParseIntError> for WardenError {
    fn from(_: std::num::ParseIntError) -> Self {
        WardenError::SyntaxError
    }
}
