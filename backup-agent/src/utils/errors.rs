//! Custom error types for the backup agent.

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}")]
    ExitStatus { command: String, status: ExitStatus },

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The authority refused the request; the message is its own text.
    #[error("Server error: {0}")]
    Rejected(String),

    #[error("Could not backup {}: {expected} bytes expected: {source}", path.display())]
    ShortWrite {
        path: PathBuf,
        expected: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Switch to user {user}: {reason}")]
    Privilege { user: String, reason: String },

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, AgentError>;
