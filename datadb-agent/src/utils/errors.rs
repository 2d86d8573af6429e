//! Custom error types for the datadb agent.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    /// The local marker disagrees with the requested direction. Recoverable with `--force`.
    #[error("{0} (Use --force?)")]
    Precondition(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Profile file error: {0}")]
    ProfileFile(#[from] ini::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    /// True for failures of the underlying sync/archive/HTTP pipeline.
    pub fn is_transfer(&self) -> bool {
        matches!(self, AgentError::Transfer(_) | AgentError::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
