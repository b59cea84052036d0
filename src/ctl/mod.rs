//! Operator commands
//!
//! Each command is a plain struct configured by the CLI and executed with
//! `run`, so it can be driven from tests without going through argument
//! parsing.

pub mod backup;

pub use backup::{BackupCommand, BackupHeader, FragmentRecord};
