//! Error types for command execution.

use thiserror::Error;

/// A command that did not finish normally. Never returned from
/// [`Chain::run`](crate::Chain::run); published on
/// [`CommandManager::errors`](crate::CommandManager::errors) instead.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command '{command}' failed: {source:#}")]
    Failed {
        command: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("command '{command}' panicked: {message}")]
    Panicked { command: String, message: String },
}

impl CommandError {
    /// Name of the command that failed.
    #[must_use]
    pub fn command(&self) -> &str {
        match self {
            Self::Failed { command, .. } | Self::Panicked { command, .. } => command,
        }
    }
}
