//! Lore CLI Library
//!
//! Thin host entry point for the Lore memory engine. Lifecycle hooks call
//! the `lore` binary with a trigger and a context; rendered memory goes to
//! stdout, diagnostics to stderr.

pub mod commands;
pub mod error;
pub mod memory;

pub use commands::{run, Cli, Command};
pub use error::{CliError, CliResult};
pub use memory::MemoryManager;
