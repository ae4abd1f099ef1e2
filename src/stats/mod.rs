//! Statistics collection and reporting module
//!
//! This module tracks mining progress across all workers and reports it
//! periodically, including:
//! - Aggregate hashrate from worker `complete` reports
//! - Solution acceptance/rejection counts
//! - Coordinator host monitoring (CPU, memory)
//!
//! The main component is [`StatsReporter`] which collects data over
//! channels and periodically writes a summary line to the logs.

/// Submodule containing the statistics reporter implementation
pub mod reporter;

// Re-export main components
pub use reporter::{HostStats, MiningStats, SolutionOutcome, StatsFeed, StatsReporter};
