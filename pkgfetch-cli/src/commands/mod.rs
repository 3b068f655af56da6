//! Subcommand implementations.

pub mod add;
pub mod common;
pub mod config;
pub mod list;
pub mod remove;
pub mod resume;
