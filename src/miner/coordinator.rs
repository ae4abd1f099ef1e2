// src/miner/coordinator.rs
//! Wiring between worker transports, sessions, dispatcher and aggregator
//!
//! One read loop runs per worker so a stalled worker never blocks the
//! others. All shared mutable state (the nonce-space partition, the solved
//! latch and the session table) lives behind a single mutex and is only
//! touched synchronously; commands go out through per-worker channels so
//! dispatching never blocks on a slow worker. Deadlines are enforced by a
//! periodic tick, not by the blocking reads; shutting a worker down closes
//! its stream, which is what unblocks a pending read.

use crate::config::WorkerSpec;
use crate::miner::aggregator::{Aggregator, SolutionHasher, Verdict};
use crate::miner::dispatcher::Dispatcher;
use crate::protocol::message::Command;
use crate::stats::{SolutionOutcome, StatsFeed};
use crate::types::{Solution, WorkTemplate};
use crate::utils::error::MinerError;
use crate::worker::session::SessionState;
use crate::worker::{
    RecordSink, RecordStream, SessionEvent, TransportError, WorkerCaps, WorkerId, WorkerProcess,
    WorkerSession,
};
use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long a worker gets between stdin closing and being killed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Tuning knobs for the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Batch size used before a worker reports its own maximum
    #[serde(default = "default_batch_size")]
    pub default_batch_size: u64,

    /// Seconds a worker gets to answer an assigned batch
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,

    /// Seconds a worker gets to produce its capability report
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,

    /// Re-derive claimed hashes before accepting a solution
    #[serde(default = "default_verify_solutions")]
    pub verify_solutions: bool,

    /// Consecutive rejected claims before a worker is terminated
    #[serde(default = "default_max_bad_claims")]
    pub max_bad_claims: u32,

    /// Seconds between device status polls (0 disables polling)
    #[serde(default = "default_info_interval_secs")]
    pub info_interval_secs: u64,

    /// Milliseconds between dispatcher housekeeping ticks
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
}

fn default_batch_size() -> u64 {
    1_000_000
}

fn default_batch_timeout_secs() -> u64 {
    30
}

fn default_init_timeout_secs() -> u64 {
    10
}

fn default_verify_solutions() -> bool {
    true
}

fn default_max_bad_claims() -> u32 {
    3
}

fn default_info_interval_secs() -> u64 {
    60
}

fn default_tick_millis() -> u64 {
    100
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            default_batch_size: default_batch_size(),
            batch_timeout_secs: default_batch_timeout_secs(),
            init_timeout_secs: default_init_timeout_secs(),
            verify_solutions: default_verify_solutions(),
            max_bad_claims: default_max_bad_claims(),
            info_interval_secs: default_info_interval_secs(),
            tick_millis: default_tick_millis(),
        }
    }
}

impl CoordinatorConfig {
    fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    fn info_interval(&self) -> Duration {
        Duration::from_secs(self.info_interval_secs)
    }

    fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(10))
    }
}

/// Progress the coordinator reports to the node client
#[derive(Debug, Clone, PartialEq)]
pub enum MiningEvent {
    /// A validated solution for the active template
    SolutionFound(Solution),
    /// The whole nonce space was searched without a solution
    SpaceExhausted {
        /// Template whose space was exhausted
        template_id: u64,
    },
}

/// Per-worker bookkeeping alongside the session state machine
struct SessionHandle {
    session: WorkerSession,
    /// Command channel to the writer task; dropped to end the worker
    commands: Option<mpsc::UnboundedSender<Command>>,
    /// Deadline for the capability report while `Initializing`
    init_deadline: Option<Instant>,
    /// Consecutive rejected solution claims
    bad_claims: u32,
}

impl SessionHandle {
    fn send(&self, command: Command) {
        if let Some(tx) = &self.commands {
            let _ = tx.send(command);
        }
    }
}

/// Everything guarded by the single coordinator mutex
struct ControlState {
    dispatcher: Dispatcher,
    aggregator: Aggregator,
    sessions: HashMap<WorkerId, SessionHandle>,
    max_bad_claims: u32,
    exhausted_reported: bool,
    last_info_poll: Instant,
    events: mpsc::UnboundedSender<MiningEvent>,
    stats: Option<StatsFeed>,
}

impl ControlState {
    /// Hands a worker its next batch, if one is available and wanted
    fn maybe_assign(&mut self, worker: WorkerId, now: Instant) {
        let Some(template) = self.dispatcher.template().cloned() else {
            return;
        };
        if self.aggregator.is_solved(template.id) {
            return;
        }
        let Some(handle) = self.sessions.get_mut(&worker) else {
            return;
        };
        if !handle.session.is_ready() {
            return;
        }
        let cap = handle.session.caps().map(|c: WorkerCaps| c.max_batch_size);
        let Some(batch) = self.dispatcher.issue(worker, cap, now) else {
            return;
        };

        match handle
            .session
            .assign(batch.id, &template, batch.start, batch.count)
        {
            Ok(command) => {
                log::debug!(
                    "Assigned batch {} [{}, +{}) to {}",
                    batch.id,
                    batch.start,
                    batch.count,
                    worker
                );
                handle.send(command);
            }
            Err(rejected) => {
                log::warn!("Assignment refused: {}", rejected);
                self.dispatcher.resolve(batch.id);
                self.dispatcher.requeue(&batch);
            }
        }
    }

    /// Offers work to every session that can take it
    fn assign_ready(&mut self, now: Instant) {
        let mut ids: Vec<WorkerId> = self
            .sessions
            .iter()
            .filter(|(_, h)| h.session.is_ready())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        for id in ids {
            self.maybe_assign(id, now);
        }
    }

    /// Cancels every other worker's outstanding batch after a solve
    fn stop_others(&mut self, solver: WorkerId) {
        for (id, handle) in self.sessions.iter_mut() {
            if *id == solver {
                continue;
            }
            if let Some(stop) = handle.session.request_stop() {
                log::debug!("Stopping {} after solve", id);
                handle.send(stop);
            }
        }
    }

    /// Shuts one worker down and reclaims everything it held
    fn terminate_worker(&mut self, worker: WorkerId, reason: &str) {
        let reclaimed = self.dispatcher.reclaim_worker(worker);
        let Some(handle) = self.sessions.get_mut(&worker) else {
            return;
        };
        if matches!(
            handle.session.state(),
            SessionState::ShuttingDown | SessionState::Terminated
        ) {
            return;
        }
        log::warn!(
            "Terminating {}: {} ({} batches reclaimed)",
            worker,
            reason,
            reclaimed
        );
        let command = handle.session.begin_shutdown();
        handle.send(command);
        handle.commands = None;
        handle.init_deadline = None;
    }

    /// Reports exhaustion exactly once per template
    fn check_exhaustion(&mut self) {
        if self.exhausted_reported {
            return;
        }
        let Some(template) = self.dispatcher.template() else {
            return;
        };
        let template_id = template.id;
        if self.aggregator.is_solved(template_id) {
            return;
        }
        if self.dispatcher.is_exhausted() {
            log::info!(
                "Nonce space exhausted for template {} with no solution",
                template_id
            );
            let _ = self.events.send(MiningEvent::SpaceExhausted { template_id });
            self.exhausted_reported = true;
        }
    }

    fn reset_bad_claims(&mut self, worker: WorkerId) {
        if let Some(handle) = self.sessions.get_mut(&worker) {
            handle.bad_claims = 0;
        }
    }

    /// Counts a rejected claim; past the threshold the worker goes
    fn flag_bad_claim(&mut self, worker: WorkerId) {
        let Some(handle) = self.sessions.get_mut(&worker) else {
            return;
        };
        handle.bad_claims += 1;
        let strikes = handle.bad_claims;
        if self.max_bad_claims > 0 && strikes >= self.max_bad_claims {
            self.terminate_worker(worker, "too many invalid solution claims");
        }
    }

    fn on_initialized(&mut self, worker: WorkerId, caps: WorkerCaps, now: Instant) {
        if let Some(handle) = self.sessions.get_mut(&worker) {
            handle.init_deadline = None;
        }
        log::info!(
            "{} ready: {} GPU(s), {} bytes device memory, max batch {}",
            worker,
            caps.gpu_count,
            caps.total_memory,
            caps.max_batch_size
        );
        self.maybe_assign(worker, now);
    }

    fn on_solution(
        &mut self,
        worker: WorkerId,
        batch_id: u64,
        template_id: u64,
        nonce: u64,
        hash: &str,
        now: Instant,
    ) {
        if self.dispatcher.resolve(batch_id).is_none() {
            log::debug!("Result for unknown batch {} from {}", batch_id, worker);
        }
        let Some(template) = self.dispatcher.template().cloned() else {
            return;
        };

        match self.aggregator.submit(&template, template_id, nonce, hash) {
            Verdict::Accepted(solution) => {
                log::info!(
                    "Accepted solution nonce={} hash={} for template {} from {}",
                    solution.nonce,
                    solution.hash_hex(),
                    solution.template_id,
                    worker
                );
                if let Some(stats) = &self.stats {
                    let _ = stats.outcomes.send(SolutionOutcome::Accepted);
                }
                self.reset_bad_claims(worker);
                let _ = self.events.send(MiningEvent::SolutionFound(solution));
                self.stop_others(worker);
            }
            Verdict::Duplicate => {
                log::debug!("Discarding duplicate solution from {}", worker);
            }
            Verdict::Stale => {
                log::debug!(
                    "Discarding solution for superseded template {} from {}",
                    template_id,
                    worker
                );
            }
            Verdict::Rejected(reason) => {
                log::warn!("Rejected claim from {}: {}", worker, reason);
                if let Some(stats) = &self.stats {
                    let _ = stats.outcomes.send(SolutionOutcome::Rejected);
                }
                self.flag_bad_claim(worker);
            }
        }

        self.maybe_assign(worker, now);
        self.check_exhaustion();
    }

    fn on_complete(
        &mut self,
        worker: WorkerId,
        batch_id: u64,
        hashes_computed: u64,
        duration_ms: u64,
        now: Instant,
    ) {
        if let Some(stats) = &self.stats {
            let _ = stats.hashes.send(hashes_computed);
        }
        match self.dispatcher.resolve(batch_id) {
            Some(batch) => log::debug!(
                "{} finished batch {} ({} hashes in {} ms)",
                worker,
                batch.id,
                hashes_computed,
                duration_ms
            ),
            None => log::debug!("Result for unknown batch {} from {}", batch_id, worker),
        }
        self.reset_bad_claims(worker);
        self.maybe_assign(worker, now);
        self.check_exhaustion();
    }

    fn on_worker_error(
        &mut self,
        worker: WorkerId,
        message: &str,
        failed_batch: Option<u64>,
        now: Instant,
    ) {
        log::warn!("{} reported an error: {}", worker, message);
        if let Some(batch_id) = failed_batch {
            if let Some(batch) = self.dispatcher.resolve(batch_id) {
                self.dispatcher.requeue(&batch);
            }
        }
        self.assign_ready(now);
    }

    fn on_init_failed(&mut self, worker: WorkerId, message: &str) {
        log::error!("{} failed to initialize: {}", worker, message);
        if let Some(handle) = self.sessions.get_mut(&worker) {
            handle.commands = None;
            handle.init_deadline = None;
        }
    }

    /// Periodic housekeeping: deadlines, init timeouts, device polling
    fn tick(&mut self, config: &CoordinatorConfig, now: Instant) {
        for batch in self.dispatcher.expire(now) {
            log::warn!(
                "Batch {} [{}, +{}) timed out on {}",
                batch.id,
                batch.start,
                batch.count,
                batch.worker
            );
            self.terminate_worker(batch.worker, "batch deadline exceeded");
        }

        let overdue: Vec<WorkerId> = self
            .sessions
            .iter()
            .filter(|(_, h)| {
                h.session.state() == SessionState::Initializing
                    && matches!(h.init_deadline, Some(deadline) if deadline <= now)
            })
            .map(|(id, _)| *id)
            .collect();
        for worker in overdue {
            self.terminate_worker(worker, "no capability report before deadline");
        }

        if config.info_interval_secs > 0
            && now.duration_since(self.last_info_poll) >= config.info_interval()
        {
            self.last_info_poll = now;
            for handle in self.sessions.values() {
                if matches!(
                    handle.session.state(),
                    SessionState::Ready | SessionState::Assigned
                ) {
                    handle.send(handle.session.query_info());
                }
            }
        }

        self.assign_ready(now);
        self.check_exhaustion();
    }

    fn all_workers_lost(&self) -> bool {
        !self.sessions.is_empty() && self.sessions.values().all(|h| h.session.is_terminated())
    }
}

struct Shared {
    config: CoordinatorConfig,
    state: Mutex<ControlState>,
    /// Active template mirrored outside the lock for cheap reads
    current_template: ArcSwapOption<WorkTemplate>,
    next_worker_id: AtomicUsize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn handle_record(&self, worker: WorkerId, line: &str) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        let event = match state.sessions.get_mut(&worker) {
            Some(handle) => handle.session.on_record(line),
            None => return,
        };
        let Some(event) = event else {
            return;
        };

        match event {
            SessionEvent::Initialized(caps) => state.on_initialized(worker, caps, now),
            SessionEvent::SolutionFound {
                batch_id,
                template_id,
                nonce,
                hash,
            } => state.on_solution(worker, batch_id, template_id, nonce, &hash, now),
            SessionEvent::BatchComplete {
                batch_id,
                hashes_computed,
                duration_ms,
                ..
            } => state.on_complete(worker, batch_id, hashes_computed, duration_ms, now),
            SessionEvent::Stopped => state.maybe_assign(worker, now),
            SessionEvent::Info(gpus) => {
                for gpu in gpus {
                    log::debug!(
                        "{} gpu{} ({}): {:.1}% busy, {:.1}C",
                        worker,
                        gpu.index,
                        gpu.name,
                        gpu.utilization,
                        gpu.temperature
                    );
                }
            }
            SessionEvent::WorkerError {
                message,
                failed_batch,
            } => state.on_worker_error(worker, &message, failed_batch, now),
            SessionEvent::InitFailed(message) => state.on_init_failed(worker, &message),
            SessionEvent::ProtocolError(message) => log::warn!("{}", message),
        }
    }

    fn handle_transport_failure(&self, worker: WorkerId, error: &TransportError) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        let was_shutting_down = match state.sessions.get_mut(&worker) {
            Some(handle) => {
                let was = handle.session.state() == SessionState::ShuttingDown;
                handle.session.on_transport_closed();
                handle.commands = None;
                handle.init_deadline = None;
                was
            }
            None => return,
        };

        if was_shutting_down {
            log::info!("{} shut down", worker);
        } else {
            log::warn!("{} lost: {}", worker, error);
        }

        let reclaimed = state.dispatcher.reclaim_worker(worker);
        if reclaimed > 0 {
            log::info!("Reassigning {} batch(es) from {}", reclaimed, worker);
            state.assign_ready(now);
        }
    }
}

/// Drives a fleet of external workers against the active work template
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Coordinator {
    /// Creates a coordinator and the event stream it reports into
    ///
    /// `hasher` enables independent re-derivation of claimed hashes when
    /// the configuration asks for verification; `stats` receives progress
    /// counters when a reporter is attached.
    pub fn new(
        config: CoordinatorConfig,
        hasher: Option<Arc<dyn SolutionHasher>>,
        stats: Option<StatsFeed>,
    ) -> (Self, mpsc::UnboundedReceiver<MiningEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let state = ControlState {
            dispatcher: Dispatcher::new(config.default_batch_size, config.batch_timeout()),
            aggregator: Aggregator::new(config.verify_solutions, hasher),
            sessions: HashMap::new(),
            max_bad_claims: config.max_bad_claims,
            exhausted_reported: false,
            last_info_poll: Instant::now(),
            events,
            stats,
        };
        let coordinator = Coordinator {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(state),
                current_template: ArcSwapOption::empty(),
                next_worker_id: AtomicUsize::new(0),
                tasks: Mutex::new(Vec::new()),
            }),
        };
        (coordinator, events_rx)
    }

    /// Spawns a worker subprocess and attaches it
    pub fn spawn_worker(&self, spec: &WorkerSpec) -> Result<WorkerId, MinerError> {
        let (process, sink, stream) = WorkerProcess::spawn(&spec.command, &spec.args, &spec.env)?;
        log::info!("Spawned worker process: {}", spec.command);
        Ok(self.attach_worker(sink, stream, Some(process)))
    }

    /// Attaches a worker over an arbitrary duplex stream pair
    ///
    /// Initialization starts immediately. The returned id identifies the
    /// worker in logs and events for its whole life.
    pub fn attach_worker<R, W>(
        &self,
        sink: RecordSink<W>,
        stream: RecordStream<R>,
        process: Option<WorkerProcess>,
    ) -> WorkerId
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let id = WorkerId(self.shared.next_worker_id.fetch_add(1, Ordering::Relaxed));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut session = WorkerSession::new(id);
        if let Ok(init) = session.initialize(self.shared.config.default_batch_size) {
            let _ = tx.send(init);
        }
        let handle = SessionHandle {
            session,
            commands: Some(tx),
            init_deadline: Some(Instant::now() + self.shared.config.init_timeout()),
            bad_claims: 0,
        };
        self.shared.state.lock().unwrap().sessions.insert(id, handle);

        // Writer task: owns the sink and, transitively, the process handle.
        // Ends on channel close or `shutdown`, then closes the stream so a
        // read blocked on the worker's side can finish.
        let writer = tokio::spawn(async move {
            let mut sink = sink;
            while let Some(command) = rx.recv().await {
                let last = matches!(command, Command::Shutdown);
                if sink.send(&command).await.is_err() {
                    break;
                }
                if last {
                    break;
                }
            }
            let _ = sink.close().await;
            if let Some(process) = process {
                process.reap(SHUTDOWN_GRACE).await;
            }
        });

        // Read loop: one per worker, so one stalled worker never blocks
        // the rest. Only a transport error ends it.
        let shared = Arc::clone(&self.shared);
        let reader = tokio::spawn(async move {
            let mut stream = stream;
            loop {
                match stream.next_record().await {
                    Ok(line) => shared.handle_record(id, &line),
                    Err(error) => {
                        shared.handle_transport_failure(id, &error);
                        break;
                    }
                }
            }
        });

        self.shared.tasks.lock().unwrap().extend([writer, reader]);
        id
    }

    /// Installs a new work template, preempting in-flight batches
    ///
    /// Outstanding batches of the previous template are invalidated and
    /// every assigned worker receives `stop`; new assignments go out to
    /// ready workers immediately and to stopping workers as they
    /// acknowledge.
    pub fn set_template(&self, template: Arc<WorkTemplate>) {
        log::info!(
            "New work template {} (nonce space {})",
            template.id,
            template.nonce_space
        );
        self.shared.current_template.store(Some(template.clone()));

        let now = Instant::now();
        let mut state = self.shared.state.lock().unwrap();
        state.exhausted_reported = false;
        state.dispatcher.set_template(template);
        for handle in state.sessions.values_mut() {
            if let Some(stop) = handle.session.request_stop() {
                handle.send(stop);
            }
        }
        state.assign_ready(now);
    }

    /// The template currently being mined, if any
    pub fn current_template(&self) -> Option<Arc<WorkTemplate>> {
        self.shared.current_template.load_full()
    }

    /// Number of sessions that are not terminated
    pub fn live_workers(&self) -> usize {
        self.shared
            .state
            .lock()
            .unwrap()
            .sessions
            .values()
            .filter(|h| !h.session.is_terminated())
            .count()
    }

    /// Runs housekeeping until every worker is gone
    ///
    /// # Errors
    /// Returns [`MinerError::NoWorkersLeft`] once all sessions have
    /// terminated; mining cannot proceed and the caller decides whether to
    /// respawn or give up.
    pub async fn run(&self) -> Result<(), MinerError> {
        let mut interval = tokio::time::interval(self.shared.config.tick());
        loop {
            interval.tick().await;
            let mut state = self.shared.state.lock().unwrap();
            state.tick(&self.shared.config, Instant::now());
            if state.all_workers_lost() {
                return Err(MinerError::NoWorkersLeft);
            }
        }
    }

    /// Shuts every worker down and waits for their tasks to finish
    pub async fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            let ids: Vec<WorkerId> = state.sessions.keys().copied().collect();
            for id in ids {
                let Some(handle) = state.sessions.get_mut(&id) else {
                    continue;
                };
                if handle.session.is_terminated() {
                    continue;
                }
                let command = handle.session.begin_shutdown();
                handle.send(command);
                handle.commands = None;
            }
        }
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.shared.tasks.lock().unwrap());
        futures::future::join_all(tasks).await;
        log::info!("All workers shut down");
    }
}
