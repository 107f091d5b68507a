//! Error types for the Lore CLI.

use lore_memory::MemoryError;
use thiserror::Error;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("Malformed request: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No data directory: pass --data-dir or set LORE_DATA_DIR")]
    NoDataDir,
}

impl CliError {
    /// Process exit code for this error.
    ///
    /// Only caller mistakes exit non-zero. Storage problems are logged and
    /// reported as success so a lifecycle hook can never fail the host.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Memory(e) if e.is_input_error() => 2,
            CliError::Json(_) | CliError::InvalidArgument(_) => 2,
            _ => 0,
        }
    }
}

/// Result type alias for CLI operations.
pub type CliResult<T> = Result<T, CliError>;
