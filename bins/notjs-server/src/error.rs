// Error taxonomy for the execution subsystem

use notjs_common::ToolchainError;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Unknown language or unsupported version, caused by the client
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error("Invalid execution request: {0}")]
    InvalidRequest(#[from] serde_json::Error),

    #[error("Source code exceeds maximum size of {limit} bytes")]
    SourceTooLarge { limit: usize },

    /// Filesystem or spawn failure before a handle exists
    #[error("Failed to start execution ({context}): {source}")]
    StartFailure {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Error writing to process: {0}")]
    StdinWrite(#[source] io::Error),

    #[error("Process input is closed")]
    InputClosed,
}

impl ExecError {
    pub fn start(context: impl Into<String>, source: io::Error) -> Self {
        ExecError::StartFailure {
            context: context.into(),
            source,
        }
    }

    /// True for errors the client caused with its request
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ExecError::Toolchain(_) | ExecError::InvalidRequest(_) | ExecError::SourceTooLarge { .. }
        )
    }
}

pub type ExecResult<T> = std::result::Result<T, ExecError>;
