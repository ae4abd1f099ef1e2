// src/config/mod.rs
//! Configuration management for the coordinator
//!
//! This module handles all configuration-related functionality including:
//! - Loading and parsing configuration files
//! - Generating configuration templates
//! - Describing the worker processes to spawn
//!
//! The configuration uses TOML format with sections for coordinator
//! tuning, worker processes, and the node RPC connection.

/// Core configuration implementation
///
/// Contains the [`Config`] struct and related types that define
/// the coordinator's configuration structure and behavior.
pub mod config;

// Re-export key items for easy access
pub use config::{Config, WorkerSpec};

use crate::utils::error::MinerError;
use std::path::PathBuf;

/// Loads coordinator configuration from a TOML file
///
/// # Arguments
/// * `path` - Path to the configuration file (anything convertible to PathBuf)
///
/// # Returns
/// * `Ok(Config)` - Successfully loaded configuration
/// * `Err(MinerError)` - If the file couldn't be read or parsed
pub fn load(path: impl Into<PathBuf>) -> Result<Config, MinerError> {
    Config::load(path)
}

/// Generates a commented configuration template
///
/// # Arguments
/// * `node` - Whether to include the node RPC configuration section
///
/// # Returns
/// String containing a ready-to-use TOML configuration template
pub fn generate_template(node: bool) -> String {
    Config::generate_template(node)
}
