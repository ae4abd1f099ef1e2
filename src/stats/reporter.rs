// src/stats/reporter.rs
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use sysinfo::System;

/// Statistics related to mining progress across all workers
#[derive(Debug, Clone, Default)]
pub struct MiningStats {
    /// Total number of hashes the workers reported computing
    pub hashes_total: u64,
    /// Number of solutions accepted by the aggregator
    pub solutions_accepted: u64,
    /// Number of claimed solutions rejected by validation
    pub claims_rejected: u64,
    /// Average hashrate over 1 minute (hashes per second)
    pub avg_hashrate_1m: f64,
}

/// Statistics about the coordinator host itself
#[derive(Debug, Clone)]
pub struct HostStats {
    /// Current CPU usage percentage (0-100)
    pub cpu_usage: f32,
    /// Memory currently in use on the host (in bytes)
    pub memory_used: u64,
}

/// Outcome of validating a claimed solution
#[derive(Debug, Clone, Copy)]
pub enum SolutionOutcome {
    /// The claim was accepted and reported upward
    Accepted,
    /// The claim failed validation
    Rejected,
}

/// Bundle of senders the coordinator feeds progress into
#[derive(Debug, Clone)]
pub struct StatsFeed {
    /// Receives hash counts from `complete` reports
    pub hashes: Sender<u64>,
    /// Receives validation outcomes
    pub outcomes: Sender<SolutionOutcome>,
}

/// Collects and reports mining and host statistics
pub struct StatsReporter {
    /// Atomic counters for mining statistics
    stats: Arc<MiningStatsAtomic>,
    /// System information collector
    system: System,
    /// Interval at which stats are reported
    report_interval: Duration,
}

/// Atomic version of MiningStats for thread-safe operations
struct MiningStatsAtomic {
    hashes: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    start_time: Instant,
}

impl Clone for StatsReporter {
    fn clone(&self) -> Self {
        StatsReporter {
            stats: self.stats.clone(),
            system: System::new_all(),
            report_interval: self.report_interval,
        }
    }
}

impl StatsReporter {
    /// Creates a new StatsReporter with the specified reporting interval
    pub fn new(report_interval: Duration) -> Self {
        StatsReporter {
            stats: Arc::new(MiningStatsAtomic {
                hashes: AtomicU64::new(0),
                accepted: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
            system: System::new_all(),
            report_interval,
        }
    }

    /// Creates and returns a channel sender for hash counts
    ///
    /// The reporter listens for counts on a background thread; the
    /// coordinator sends each batch's `hashes_computed` as it resolves.
    pub fn hash_sender(&self) -> Sender<u64> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.start_hash_listener(rx);
        tx
    }

    /// Creates and returns a channel sender for validation outcomes
    pub fn solution_sender(&self) -> Sender<SolutionOutcome> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.start_outcome_listener(rx);
        tx
    }

    /// Bundles fresh senders for handing to the coordinator
    pub fn feed(&self) -> StatsFeed {
        StatsFeed {
            hashes: self.hash_sender(),
            outcomes: self.solution_sender(),
        }
    }

    /// Gets a snapshot of the current mining statistics
    pub fn get_stats(&self) -> MiningStats {
        let total_seconds = self.stats.start_time.elapsed().as_secs() as f64;
        let hashes = self.stats.hashes.load(Ordering::Relaxed);

        MiningStats {
            hashes_total: hashes,
            solutions_accepted: self.stats.accepted.load(Ordering::Relaxed),
            claims_rejected: self.stats.rejected.load(Ordering::Relaxed),
            avg_hashrate_1m: hashes as f64 / total_seconds.max(60.0) * 60.0,
        }
    }

    /// Gets the current host statistics
    ///
    /// This refreshes system information before returning the stats.
    pub fn get_host_stats(&mut self) -> HostStats {
        self.system.refresh_cpu_all();
        self.system.refresh_memory();

        let cpu_usage = self
            .system
            .cpus()
            .iter()
            .map(|c| c.cpu_usage())
            .sum::<f32>()
            / self.system.cpus().len().max(1) as f32;

        HostStats {
            cpu_usage,
            memory_used: self.system.used_memory(),
        }
    }

    /// Starts the periodic reporting of statistics
    ///
    /// This spawns a background thread that logs stats at the configured interval.
    pub fn start_reporting(&self) {
        let mut reporter = self.clone();

        std::thread::spawn(move || {
            loop {
                std::thread::sleep(reporter.report_interval);
                let mining_stats = reporter.get_stats();
                let host_stats = reporter.get_host_stats();

                log::info!(
                    "Hashrate: {:.2} H/s | Accepted/Rejected: {}/{} | Coordinator CPU: {:.1}%",
                    mining_stats.avg_hashrate_1m,
                    mining_stats.solutions_accepted,
                    mining_stats.claims_rejected,
                    host_stats.cpu_usage,
                );
            }
        });
    }

    /// Starts a listener for hash counts on a background thread
    fn start_hash_listener(&self, receiver: Receiver<u64>) {
        let stats = self.stats.clone();

        std::thread::spawn(move || {
            for count in receiver {
                stats.hashes.fetch_add(count, Ordering::Relaxed);
            }
        });
    }

    /// Starts a listener for validation outcomes on a background thread
    fn start_outcome_listener(&self, receiver: Receiver<SolutionOutcome>) {
        let stats = self.stats.clone();

        std::thread::spawn(move || {
            for outcome in receiver {
                match outcome {
                    SolutionOutcome::Accepted => stats.accepted.fetch_add(1, Ordering::Relaxed),
                    SolutionOutcome::Rejected => stats.rejected.fetch_add(1, Ordering::Relaxed),
                };
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_through_feed() {
        let reporter = StatsReporter::new(Duration::from_secs(60));
        let feed = reporter.feed();

        feed.hashes.send(1000).unwrap();
        feed.hashes.send(500).unwrap();
        feed.outcomes.send(SolutionOutcome::Accepted).unwrap();
        feed.outcomes.send(SolutionOutcome::Rejected).unwrap();

        // Listener threads drain asynchronously
        std::thread::sleep(Duration::from_millis(100));

        let stats = reporter.get_stats();
        assert_eq!(stats.hashes_total, 1500);
        assert_eq!(stats.solutions_accepted, 1);
        assert_eq!(stats.claims_rejected, 1);
    }
}
