//! Error types for the CLI

use core_types::VmError;
use thiserror::Error;

/// CLI-specific errors
#[derive(Debug, Error)]
pub enum CliError {
    /// Loading, linking or running the program failed
    #[error(transparent)]
    Vm(#[from] VmError),

    /// Options that cannot be combined into a VM configuration
    #[error("invalid option: {0}")]
    InvalidOption(String),
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
