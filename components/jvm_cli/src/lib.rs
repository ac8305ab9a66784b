//! Class-file VM launcher
//!
//! Parses `corten-jvm` arguments, maps them onto a [`interpreter::VmConfig`]
//! and a directory class path, and runs the main class.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod error;
pub mod launcher;

pub use cli::{normalize_args, parse_size, Cli};
pub use error::{CliError, CliResult};
pub use launcher::{exit_code, Launcher};
