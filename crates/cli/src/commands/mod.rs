//! Subcommand implementations

pub mod models;
pub mod prediction;
