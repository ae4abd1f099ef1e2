// src/miner/dispatcher.rs
//! Nonce-space partitioning and batch bookkeeping
//!
//! The dispatcher owns the global nonce range of the active work template.
//! It carves bounded batches, remembers which worker holds which range, and
//! guarantees that reclaimed ranges (timeouts, dead workers, worker errors)
//! are reissued exactly once: the union of resolved batches always covers
//! `[0, nonce_space)` with no two live batches overlapping.

use crate::types::WorkTemplate;
use crate::worker::WorkerId;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A contiguous nonce sub-range assigned to one worker
#[derive(Debug, Clone)]
pub struct Batch {
    /// Assignment identifier, unique per dispatcher
    pub id: u64,
    /// Template this batch was carved from
    pub template_id: u64,
    /// First nonce of the range
    pub start: u64,
    /// Number of nonces in the range
    pub count: u64,
    /// Worker the batch was sent to
    pub worker: WorkerId,
    /// When the batch was issued
    pub issued_at: Instant,
    /// Wall-clock deadline after which the batch is reclaimed
    pub deadline: Instant,
}

/// Partitions the nonce space of the active template into batches
#[derive(Debug)]
pub struct Dispatcher {
    template: Option<Arc<WorkTemplate>>,
    /// Next nonce that has never been issued
    next_nonce: u64,
    /// Reclaimed ranges, reissued before fresh ones
    requeued: VecDeque<(u64, u64)>,
    /// Batches awaiting their terminal response, by assignment id
    outstanding: HashMap<u64, Batch>,
    next_batch_id: u64,
    default_batch_size: u64,
    batch_timeout: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher with no active template
    ///
    /// `default_batch_size` bounds batches for workers that have not
    /// reported capabilities yet; `batch_timeout` is the deadline put on
    /// every issued batch.
    pub fn new(default_batch_size: u64, batch_timeout: Duration) -> Self {
        Dispatcher {
            template: None,
            next_nonce: 0,
            requeued: VecDeque::new(),
            outstanding: HashMap::new(),
            next_batch_id: 0,
            default_batch_size,
            batch_timeout,
        }
    }

    /// The active template, if any
    pub fn template(&self) -> Option<&Arc<WorkTemplate>> {
        self.template.as_ref()
    }

    /// Replaces the active template
    ///
    /// All outstanding batches of the previous template are invalidated:
    /// their assignment ids are forgotten, so eventual late responses
    /// resolve to nothing.
    pub fn set_template(&mut self, template: Arc<WorkTemplate>) {
        self.template = Some(template);
        self.next_nonce = 0;
        self.requeued.clear();
        self.outstanding.clear();
    }

    /// Carves the next batch for a worker
    ///
    /// Reclaimed ranges are drained first, split down to the size cap when
    /// necessary. Returns `None` when the whole space has been issued or no
    /// template is active.
    pub fn issue(&mut self, worker: WorkerId, max_batch: Option<u64>, now: Instant) -> Option<Batch> {
        let template = self.template.as_ref()?;
        let cap = max_batch.unwrap_or(self.default_batch_size).max(1);

        let (start, count) = if let Some((start, count)) = self.requeued.pop_front() {
            if count > cap {
                // Reissue the front of the range, keep the tail queued
                self.requeued.push_front((start + cap, count - cap));
                (start, cap)
            } else {
                (start, count)
            }
        } else {
            let remaining = template.nonce_space.saturating_sub(self.next_nonce);
            if remaining == 0 {
                return None;
            }
            let count = remaining.min(cap);
            let start = self.next_nonce;
            self.next_nonce += count;
            (start, count)
        };

        let batch = Batch {
            id: self.next_batch_id,
            template_id: template.id,
            start,
            count,
            worker,
            issued_at: now,
            deadline: now + self.batch_timeout,
        };
        self.next_batch_id += 1;
        self.outstanding.insert(batch.id, batch.clone());
        Some(batch)
    }

    /// Marks a batch resolved (solved or complete)
    ///
    /// Returns `None` for assignment ids that are not outstanding — late
    /// responses for expired batches or batches of a superseded template
    /// land here and are discarded without effect.
    pub fn resolve(&mut self, batch_id: u64) -> Option<Batch> {
        self.outstanding.remove(&batch_id)
    }

    /// Returns a batch's range to the queue after a worker-reported failure
    ///
    /// The range is only requeued when the batch belongs to the active
    /// template; anything else is already covered elsewhere.
    pub fn requeue(&mut self, batch: &Batch) {
        if self.template.as_ref().map(|t| t.id) == Some(batch.template_id) {
            self.requeued.push_back((batch.start, batch.count));
        }
    }

    /// Reclaims every outstanding batch held by a dead worker
    ///
    /// Returns how many batches were reclaimed.
    pub fn reclaim_worker(&mut self, worker: WorkerId) -> usize {
        let ids: Vec<u64> = self
            .outstanding
            .values()
            .filter(|b| b.worker == worker)
            .map(|b| b.id)
            .collect();
        for id in &ids {
            if let Some(batch) = self.outstanding.remove(id) {
                self.requeued.push_back((batch.start, batch.count));
            }
        }
        ids.len()
    }

    /// Expires batches whose deadline has passed
    ///
    /// Expired ranges go back to the queue; the expired batches are
    /// returned so the caller can deal with their workers.
    pub fn expire(&mut self, now: Instant) -> Vec<Batch> {
        let ids: Vec<u64> = self
            .outstanding
            .values()
            .filter(|b| b.deadline <= now)
            .map(|b| b.id)
            .collect();
        let mut expired = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(batch) = self.outstanding.remove(&id) {
                self.requeued.push_back((batch.start, batch.count));
                expired.push(batch);
            }
        }
        expired
    }

    /// Workers currently holding an outstanding batch
    pub fn assigned_workers(&self) -> Vec<WorkerId> {
        self.outstanding.values().map(|b| b.worker).collect()
    }

    /// Number of batches awaiting a response
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    /// Whether the full nonce space has been issued and resolved
    pub fn is_exhausted(&self) -> bool {
        match &self.template {
            Some(template) => {
                self.next_nonce >= template.nonce_space
                    && self.requeued.is_empty()
                    && self.outstanding.is_empty()
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Target;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn dispatcher_with_space(space: u64) -> Dispatcher {
        let mut dispatcher = Dispatcher::new(1000, TIMEOUT);
        dispatcher.set_template(WorkTemplate::shared(1, vec![0; 8], Target::max(), space));
        dispatcher
    }

    /// Issues everything that can be issued right now and resolves it,
    /// recording the covered ranges.
    fn drain(dispatcher: &mut Dispatcher, worker: WorkerId, cap: Option<u64>) -> Vec<(u64, u64)> {
        let mut ranges = Vec::new();
        let now = Instant::now();
        while let Some(batch) = dispatcher.issue(worker, cap, now) {
            ranges.push((batch.start, batch.count));
            dispatcher.resolve(batch.id).unwrap();
        }
        ranges
    }

    #[test]
    fn test_full_space_coverage_without_gaps_or_overlap() {
        let mut dispatcher = dispatcher_with_space(3500);
        let mut ranges = drain(&mut dispatcher, WorkerId(0), None);
        assert!(dispatcher.is_exhausted());

        ranges.sort_unstable();
        let mut expected_start = 0;
        for (start, count) in ranges {
            assert_eq!(start, expected_start, "gap or overlap at {}", start);
            expected_start = start + count;
        }
        assert_eq!(expected_start, 3500);
    }

    #[test]
    fn test_batch_size_respects_worker_cap() {
        let mut dispatcher = dispatcher_with_space(10_000);
        let batch = dispatcher
            .issue(WorkerId(0), Some(256), Instant::now())
            .unwrap();
        assert_eq!(batch.start, 0);
        assert_eq!(batch.count, 256);

        // Default applies when the worker has no negotiated cap
        let batch = dispatcher.issue(WorkerId(1), None, Instant::now()).unwrap();
        assert_eq!(batch.start, 256);
        assert_eq!(batch.count, 1000);
    }

    #[test]
    fn test_last_batch_is_truncated_to_space() {
        let mut dispatcher = dispatcher_with_space(1500);
        let now = Instant::now();
        dispatcher.issue(WorkerId(0), None, now).unwrap();
        let tail = dispatcher.issue(WorkerId(0), None, now).unwrap();
        assert_eq!(tail.start, 1000);
        assert_eq!(tail.count, 500);
        assert!(dispatcher.issue(WorkerId(0), None, now).is_none());
    }

    #[test]
    fn test_expired_batch_is_requeued_not_dropped() {
        let mut dispatcher = Dispatcher::new(1000, Duration::from_millis(10));
        dispatcher.set_template(WorkTemplate::shared(1, vec![0; 8], Target::max(), 1000));

        let now = Instant::now();
        let batch = dispatcher.issue(WorkerId(0), None, now).unwrap();
        let expired = dispatcher.expire(now + Duration::from_millis(20));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, batch.id);

        // The range comes back for another worker
        let reissued = dispatcher.issue(WorkerId(1), None, now).unwrap();
        assert_eq!((reissued.start, reissued.count), (batch.start, batch.count));
        assert_ne!(reissued.id, batch.id);

        // The expired id is gone; a late response resolves to nothing
        assert!(dispatcher.resolve(batch.id).is_none());
    }

    #[test]
    fn test_requeued_range_is_split_to_cap() {
        let mut dispatcher = dispatcher_with_space(4000);
        let now = Instant::now();
        let big = dispatcher.issue(WorkerId(0), Some(4000), now).unwrap();
        dispatcher.expire(now + TIMEOUT + Duration::from_secs(1));

        // A small worker picks the range up in pieces
        let first = dispatcher.issue(WorkerId(1), Some(1500), now).unwrap();
        assert_eq!((first.start, first.count), (0, 1500));
        let second = dispatcher.issue(WorkerId(1), Some(1500), now).unwrap();
        assert_eq!((second.start, second.count), (1500, 1500));
        let third = dispatcher.issue(WorkerId(1), Some(1500), now).unwrap();
        assert_eq!((third.start, third.count), (3000, 1000));
        assert_eq!(big.count, 4000);
    }

    #[test]
    fn test_worker_reclaim() {
        let mut dispatcher = dispatcher_with_space(3000);
        let now = Instant::now();
        dispatcher.issue(WorkerId(0), None, now).unwrap();
        dispatcher.issue(WorkerId(1), None, now).unwrap();

        assert_eq!(dispatcher.reclaim_worker(WorkerId(0)), 1);
        assert_eq!(dispatcher.outstanding_count(), 1);

        // Reclaimed range is reissued before fresh space
        let batch = dispatcher.issue(WorkerId(1), None, now).unwrap();
        assert_eq!(batch.start, 0);
    }

    #[test]
    fn test_template_change_invalidates_outstanding() {
        let mut dispatcher = dispatcher_with_space(2000);
        let now = Instant::now();
        let old = dispatcher.issue(WorkerId(0), None, now).unwrap();

        dispatcher.set_template(WorkTemplate::shared(2, vec![1; 8], Target::max(), 2000));
        // Late response for the old template's batch resolves to nothing
        assert!(dispatcher.resolve(old.id).is_none());
        assert!(!dispatcher.is_exhausted());

        // The new space starts from scratch
        let batch = dispatcher.issue(WorkerId(0), None, now).unwrap();
        assert_eq!(batch.start, 0);
        assert_eq!(batch.template_id, 2);
    }

    #[test]
    fn test_requeue_ignores_stale_template() {
        let mut dispatcher = dispatcher_with_space(2000);
        let now = Instant::now();
        let old = dispatcher.issue(WorkerId(0), None, now).unwrap();

        dispatcher.set_template(WorkTemplate::shared(2, vec![1; 8], Target::max(), 2000));
        dispatcher.requeue(&old);

        let batch = dispatcher.issue(WorkerId(0), Some(5000), now).unwrap();
        assert_eq!((batch.start, batch.count), (0, 2000));
    }

    #[test]
    fn test_exhaustion_requires_everything_resolved() {
        let mut dispatcher = dispatcher_with_space(1000);
        let now = Instant::now();
        let batch = dispatcher.issue(WorkerId(0), None, now).unwrap();
        assert!(!dispatcher.is_exhausted(), "batch still outstanding");

        dispatcher.resolve(batch.id).unwrap();
        assert!(dispatcher.is_exhausted());
    }

    #[test]
    fn test_no_template_issues_nothing() {
        let mut dispatcher = Dispatcher::new(1000, TIMEOUT);
        assert!(dispatcher.issue(WorkerId(0), None, Instant::now()).is_none());
        assert!(!dispatcher.is_exhausted());
    }
}
