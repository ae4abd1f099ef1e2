// src/miner/mod.rs
//! Core coordination functionality
//!
//! This module contains the components that turn a work template into
//! distributed, validated mining:
//! - Nonce-space partitioning and batch bookkeeping
//! - Solution validation and the per-template solved latch
//! - The coordinator wiring worker sessions to both

/// Nonce-space partitioning and batch deadlines
///
/// The [`Dispatcher`] owns the global nonce range of the active template
/// and hands out non-overlapping batches to ready workers.
pub mod dispatcher;

/// Solution validation
///
/// The [`Aggregator`] checks claims against the target, optionally
/// re-derives hashes, and makes the first acceptance win.
pub mod aggregator;

/// Worker fleet wiring and the concurrency model
///
/// The [`Coordinator`] runs one read loop per worker and owns the single
/// mutual-exclusion domain around dispatcher and aggregator.
pub mod coordinator;

// Re-export main components for cleaner imports
pub use self::aggregator::{Aggregator, SolutionHasher, Verdict};
pub use self::coordinator::{Coordinator, CoordinatorConfig, MiningEvent};
pub use self::dispatcher::{Batch, Dispatcher};
