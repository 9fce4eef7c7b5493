//! Error taxonomy for harvctl.
//!
//! Core modules return the typed [`HarvesterError`]; the command surface
//! propagates it into `color_eyre::Report` so every failure prints to
//! standard error with a nonzero exit. Nothing is retried automatically.

use thiserror::Error;

/// Errors produced by harvctl itself, as opposed to raw transport failures.
#[derive(Debug, Error)]
pub enum HarvesterError {
    /// The local configuration is missing or unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// Credentials or certificates were rejected.
    #[error("authentication error: {0}")]
    Auth(String),

    /// A named resource could not be resolved, or resolved ambiguously.
    #[error("{0}")]
    Lookup(String),

    /// A flag combination or argument value is invalid.
    #[error("{0}")]
    Validation(String),

    /// An input document or quantity string could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// The management or cluster API rejected a call; the upstream message
    /// is passed through verbatim.
    #[error("API error (status {status}): {message}")]
    Upstream { status: u16, message: String },
}

impl HarvesterError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn lookup(msg: impl Into<String>) -> Self {
        Self::Lookup(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }
}

/// Shorthand used throughout the core modules.
pub type Result<T> = std::result::Result<T, HarvesterError>;
