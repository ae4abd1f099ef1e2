//! Hive Miner - proof-of-work coordination for external compute workers
//!
//! This crate provides a complete mining coordinator that drives one or
//! more external worker processes (GPU or otherwise) through a
//! line-delimited JSON control protocol:
//! - Nonce-space partitioning across workers with deadline tracking
//! - Per-worker lifecycle state machines over subprocess stdio
//! - Solution validation with optional independent hash re-derivation
//! - Node RPC integration for work templates and solution submission

#![warn(missing_docs)]
#![forbid(unsafe_code)]

/// Coordination core: dispatcher, aggregator, and the worker fleet wiring
pub mod miner;

/// Network communication with the upstream node
pub mod network;

/// Statistics collection and reporting functionality
pub mod stats;

/// Utility functions and error handling
pub mod utils;

/// Command-line interface definitions
pub mod cli;

/// Configuration management
pub mod config;

/// Shared type definitions
pub mod types;

/// Control protocol messages and codec
pub mod protocol;

/// Worker transport and session state machine
pub mod worker;

// Core exports
pub use cli::Commands;
pub use config::{Config, WorkerSpec};
pub use miner::{Aggregator, Coordinator, CoordinatorConfig, Dispatcher, MiningEvent, SolutionHasher};
pub use network::NodeClient;
pub use protocol::{Command, Report};
pub use stats::{MiningStats, StatsReporter};
pub use types::{Solution, Target, WorkTemplate};
pub use utils::{MinerError, init_logging};
pub use worker::{SessionEvent, SessionState, WorkerId, WorkerSession};
