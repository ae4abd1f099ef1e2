// src/cli/mod.rs
//! Command-line interface definitions
//!
//! Defines the clap command tree for the coordinator binary.

/// Command and option structs
pub mod commands;

// Re-export for easier access
pub use commands::{Action, Commands, ConfigOptions, ProbeOptions, StartOptions};
