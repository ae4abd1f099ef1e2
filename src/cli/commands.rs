// src/cli/commands.rs
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Hive Miner CLI - coordinates external mining workers
#[derive(Parser, Debug)]
#[command(name = "hive-miner")]
#[command(version, about, long_about = None)]
pub struct Commands {
    /// The action to perform (start mining, probe a worker, or generate config)
    #[command(subcommand)]
    pub action: Action,
}

/// Top-level commands for the coordinator
#[derive(Subcommand, Debug)]
pub enum Action {
    /// Start coordinating with the configured workers
    Start(StartOptions),

    /// Spawn one worker, query its capabilities and device status, and exit
    Probe(ProbeOptions),

    /// Generate configuration file template
    Config(ConfigOptions),
}

/// Options for starting the mining operation
#[derive(Parser, Debug)]
pub struct StartOptions {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Default nonce batch size (overrides config)
    #[arg(short, long)]
    pub batch_size: Option<u64>,

    /// Accept worker-reported hashes without re-derivation
    #[arg(long)]
    pub no_verify: bool,
}

/// Options for probing a worker process
#[derive(Parser, Debug)]
pub struct ProbeOptions {
    /// Worker program to spawn
    pub command: String,

    /// Arguments passed to the worker program
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,

    /// Seconds to wait for each response
    #[arg(short, long, default_value_t = 10)]
    pub timeout: u64,
}

/// Options for generating configuration files
#[derive(Parser, Debug)]
pub struct ConfigOptions {
    /// Output file path
    #[arg(short, long, default_value = "config.toml")]
    pub output: PathBuf,

    /// Include the node RPC configuration template
    #[arg(short, long)]
    pub node: bool,
}
