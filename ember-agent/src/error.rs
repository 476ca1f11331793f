use ember_common::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid agent configuration: {0}")]
    InvalidConfig(String),

    /// Requested path resolves outside the output directory
    #[error("path '{}' is outside the output directory", path.display())]
    PathOutsideOutputDir { path: PathBuf },

    #[error("'{}' is not a regular file", path.display())]
    NotAFile { path: PathBuf },

    #[error("cannot access '{}': {source}", path.display())]
    Access {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AgentResult<T> = Result<T, AgentError>;
