// src/worker/session.rs
//! Lifecycle state machine for one worker
//!
//! The session is pure state: command methods return the wire [`Command`]
//! to enqueue and [`WorkerSession::on_record`] maps an inbound record to at
//! most one [`SessionEvent`]. A malformed or out-of-sequence record never
//! changes state; workers under test may emit noise on the protocol stream
//! and only a transport failure is fatal.

use crate::protocol::codec::{CodecError, decode_report};
use crate::protocol::message::{Command, GpuInfo, Report};
use crate::types::WorkTemplate;
use std::fmt;
use thiserror::Error;

/// Identifies one worker for the lifetime of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Lifecycle states of a worker session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no `init` sent yet
    Uninitialized,
    /// `init` sent, waiting for the capability report
    Initializing,
    /// Capabilities known, no batch outstanding
    Ready,
    /// One batch outstanding
    Assigned,
    /// `shutdown` sent, waiting for the stream to close
    ShuttingDown,
    /// Gone; only reachable states end here
    Terminated,
}

/// Capabilities negotiated during initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerCaps {
    /// Number of GPUs the worker controls
    pub gpu_count: u32,
    /// Total device memory in bytes
    pub total_memory: u64,
    /// Largest batch the worker accepts
    pub max_batch_size: u64,
}

/// A command was requested in a state where it is not legal
#[derive(Error, Debug)]
#[error("{command} not legal for {worker} in state {state:?}")]
pub struct IllegalCommand {
    /// Worker the command was aimed at
    pub worker: WorkerId,
    /// State the session was in
    pub state: SessionState,
    /// The rejected command
    pub command: &'static str,
}

/// What an inbound record meant, after sequence checking
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Capability report arrived; the session is now `Ready`
    Initialized(WorkerCaps),
    /// The outstanding batch produced a candidate solution
    SolutionFound {
        /// Assignment the solution answers
        batch_id: u64,
        /// Template the batch was carved from
        template_id: u64,
        /// Claimed nonce
        nonce: u64,
        /// Claimed hash, still hex
        hash: String,
    },
    /// The outstanding batch was exhausted without a solution
    BatchComplete {
        /// Assignment the report answers
        batch_id: u64,
        /// Template the batch was carved from
        template_id: u64,
        /// Nonces the worker hashed
        hashes_computed: u64,
        /// Time the worker spent
        duration_ms: u64,
    },
    /// A requested cancellation was acknowledged; the session is `Ready`
    Stopped,
    /// Device status report
    Info(Vec<GpuInfo>),
    /// Worker-reported failure, non-fatal to the session
    WorkerError {
        /// Worker's description of the failure
        message: String,
        /// Batch that failed, when one was outstanding
        failed_batch: Option<u64>,
    },
    /// Initialization failed; the session is `Terminated`
    InitFailed(String),
    /// Malformed or out-of-sequence record, discarded without state change
    ProtocolError(String),
}

/// Reference to the batch currently on a worker
#[derive(Debug, Clone, Copy)]
struct BatchRef {
    batch_id: u64,
    template_id: u64,
}

/// State machine for one worker's message exchange
#[derive(Debug)]
pub struct WorkerSession {
    id: WorkerId,
    state: SessionState,
    caps: Option<WorkerCaps>,
    /// Batch awaiting its terminal response
    current: Option<BatchRef>,
    /// Batch cancelled by `stop`; late responses for it are discarded
    cancelled: Option<BatchRef>,
}

impl WorkerSession {
    /// Creates a session in `Uninitialized`
    pub fn new(id: WorkerId) -> Self {
        WorkerSession {
            id,
            state: SessionState::Uninitialized,
            caps: None,
            current: None,
            cancelled: None,
        }
    }

    /// This session's worker id
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Negotiated capabilities, once `initialized` has arrived
    pub fn caps(&self) -> Option<WorkerCaps> {
        self.caps
    }

    /// Assignment id of the outstanding batch, if any
    pub fn current_batch(&self) -> Option<u64> {
        self.current.map(|b| b.batch_id)
    }

    /// Whether the session can receive a new assignment
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Whether the session is gone for good
    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    /// Starts capability negotiation
    pub fn initialize(&mut self, batch_size_hint: u64) -> Result<Command, IllegalCommand> {
        if self.state != SessionState::Uninitialized {
            return Err(self.illegal("init"));
        }
        self.state = SessionState::Initializing;
        Ok(Command::Init {
            batch_size: batch_size_hint,
        })
    }

    /// Assigns a batch to a `Ready` session
    pub fn assign(
        &mut self,
        batch_id: u64,
        template: &WorkTemplate,
        start_nonce: u64,
        nonce_count: u64,
    ) -> Result<Command, IllegalCommand> {
        if self.state != SessionState::Ready {
            return Err(self.illegal("mine"));
        }
        self.state = SessionState::Assigned;
        self.current = Some(BatchRef {
            batch_id,
            template_id: template.id,
        });
        Ok(Command::Mine {
            work: template.header_hex(),
            target: template.target.to_hex(),
            start_nonce,
            nonce_count,
        })
    }

    /// Requests cancellation of the outstanding batch
    ///
    /// Returns `None` when there is nothing to cancel (not assigned, or a
    /// stop is already in flight). The session stays `Assigned` until the
    /// worker acknowledges with `stopped`; any late terminal response for
    /// the cancelled batch is discarded by assignment id.
    pub fn request_stop(&mut self) -> Option<Command> {
        if self.state != SessionState::Assigned {
            return None;
        }
        match self.current.take() {
            Some(batch) => {
                self.cancelled = Some(batch);
                Some(Command::Stop)
            }
            None => None,
        }
    }

    /// Builds a status query; legal in any live state
    pub fn query_info(&self) -> Command {
        Command::QueryInfo
    }

    /// Starts shutdown; the session terminates when the stream closes
    pub fn begin_shutdown(&mut self) -> Command {
        self.state = SessionState::ShuttingDown;
        self.current = None;
        Command::Shutdown
    }

    /// Records a transport failure
    ///
    /// Returns the assignment id the worker still owed a response for, so
    /// the dispatcher can reclaim it.
    pub fn on_transport_closed(&mut self) -> Option<u64> {
        let lost = self.current.take().map(|b| b.batch_id);
        self.state = SessionState::Terminated;
        lost
    }

    /// Applies one inbound record
    ///
    /// Returns `None` when the record is silently discarded (stale batch
    /// response, or anything after shutdown began).
    pub fn on_record(&mut self, line: &str) -> Option<SessionEvent> {
        let report = match decode_report(line) {
            Ok(report) => report,
            Err(CodecError::Malformed(msg)) => {
                return Some(SessionEvent::ProtocolError(format!(
                    "{}: malformed record: {}",
                    self.id, msg
                )));
            }
            Err(CodecError::UnknownType(kind)) => {
                return Some(SessionEvent::ProtocolError(format!(
                    "{}: unknown message type '{}'",
                    self.id, kind
                )));
            }
        };

        if matches!(
            self.state,
            SessionState::ShuttingDown | SessionState::Terminated
        ) {
            return None;
        }

        match report {
            // Status reports are legal in any live state
            Report::Info { gpus } => Some(SessionEvent::Info(gpus)),
            report => match self.state {
                SessionState::Initializing => self.on_initializing(report),
                SessionState::Assigned => self.on_assigned(report),
                SessionState::Uninitialized | SessionState::Ready => match report {
                    Report::Error { message } => Some(SessionEvent::WorkerError {
                        message,
                        failed_batch: None,
                    }),
                    other => Some(self.violation(&other)),
                },
                SessionState::ShuttingDown | SessionState::Terminated => None,
            },
        }
    }

    fn on_initializing(&mut self, report: Report) -> Option<SessionEvent> {
        match report {
            Report::Initialized {
                gpu_count,
                total_memory,
                max_batch_size,
            } => {
                let caps = WorkerCaps {
                    gpu_count,
                    total_memory,
                    max_batch_size,
                };
                self.caps = Some(caps);
                self.state = SessionState::Ready;
                Some(SessionEvent::Initialized(caps))
            }
            // A worker that cannot produce a capability report is useless
            Report::Error { message } => {
                self.state = SessionState::Terminated;
                Some(SessionEvent::InitFailed(message))
            }
            other => Some(self.violation(&other)),
        }
    }

    fn on_assigned(&mut self, report: Report) -> Option<SessionEvent> {
        match report {
            Report::Solution { nonce, hash } => match self.current.take() {
                Some(batch) => {
                    self.state = SessionState::Ready;
                    Some(SessionEvent::SolutionFound {
                        batch_id: batch.batch_id,
                        template_id: batch.template_id,
                        nonce,
                        hash,
                    })
                }
                // Terminal response for a cancelled batch
                None => None,
            },
            Report::Complete {
                hashes_computed,
                duration_ms,
            } => match self.current.take() {
                Some(batch) => {
                    self.state = SessionState::Ready;
                    Some(SessionEvent::BatchComplete {
                        batch_id: batch.batch_id,
                        template_id: batch.template_id,
                        hashes_computed,
                        duration_ms,
                    })
                }
                None => None,
            },
            Report::Stopped => {
                if self.cancelled.take().is_some() {
                    self.state = SessionState::Ready;
                    Some(SessionEvent::Stopped)
                } else {
                    Some(self.violation(&Report::Stopped))
                }
            }
            Report::Error { message } => match self.current.take() {
                Some(batch) => {
                    self.state = SessionState::Ready;
                    Some(SessionEvent::WorkerError {
                        message,
                        failed_batch: Some(batch.batch_id),
                    })
                }
                None => Some(SessionEvent::WorkerError {
                    message,
                    failed_batch: None,
                }),
            },
            other => Some(self.violation(&other)),
        }
    }

    fn violation(&self, report: &Report) -> SessionEvent {
        SessionEvent::ProtocolError(format!(
            "{}: {:?} not expected in state {:?}",
            self.id, report, self.state
        ))
    }

    fn illegal(&self, command: &'static str) -> IllegalCommand {
        IllegalCommand {
            worker: self.id,
            state: self.state,
            command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Target;

    fn template() -> std::sync::Arc<WorkTemplate> {
        WorkTemplate::shared(1, vec![0xAB; 8], Target::max(), 1_000_000)
    }

    fn ready_session() -> WorkerSession {
        let mut session = WorkerSession::new(WorkerId(0));
        session.initialize(1000).unwrap();
        session.on_record(
            r#"{"type":"initialized","gpu_count":2,"total_memory":1024,"max_batch_size":5000}"#,
        );
        session
    }

    #[test]
    fn test_init_handshake() {
        let mut session = WorkerSession::new(WorkerId(3));
        assert_eq!(session.state(), SessionState::Uninitialized);

        let command = session.initialize(1000).unwrap();
        assert_eq!(command, Command::Init { batch_size: 1000 });
        assert_eq!(session.state(), SessionState::Initializing);

        let event = session.on_record(
            r#"{"type":"initialized","gpu_count":2,"total_memory":1024,"max_batch_size":5000}"#,
        );
        assert_eq!(
            event,
            Some(SessionEvent::Initialized(WorkerCaps {
                gpu_count: 2,
                total_memory: 1024,
                max_batch_size: 5000,
            }))
        );
        assert!(session.is_ready());
        assert_eq!(session.caps().unwrap().max_batch_size, 5000);
    }

    #[test]
    fn test_double_init_is_illegal() {
        let mut session = WorkerSession::new(WorkerId(0));
        session.initialize(1000).unwrap();
        assert!(session.initialize(1000).is_err());
    }

    #[test]
    fn test_error_during_init_terminates() {
        let mut session = WorkerSession::new(WorkerId(0));
        session.initialize(1000).unwrap();

        let event = session.on_record(r#"{"type":"error","message":"no devices"}"#);
        assert_eq!(
            event,
            Some(SessionEvent::InitFailed("no devices".to_string()))
        );
        assert!(session.is_terminated());
    }

    #[test]
    fn test_assign_then_solution() {
        let mut session = ready_session();
        let command = session.assign(10, &template(), 0, 5000).unwrap();
        match command {
            Command::Mine {
                start_nonce,
                nonce_count,
                ..
            } => {
                assert_eq!(start_nonce, 0);
                assert_eq!(nonce_count, 5000);
            }
            other => panic!("Expected mine, got {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Assigned);
        assert_eq!(session.current_batch(), Some(10));

        let event = session.on_record(&format!(
            r#"{{"type":"solution","nonce":42,"hash":"{}"}}"#,
            "0".repeat(64)
        ));
        match event {
            Some(SessionEvent::SolutionFound {
                batch_id,
                template_id,
                nonce,
                ..
            }) => {
                assert_eq!(batch_id, 10);
                assert_eq!(template_id, 1);
                assert_eq!(nonce, 42);
            }
            other => panic!("Expected solution, got {:?}", other),
        }
        assert!(session.is_ready());
        assert_eq!(session.current_batch(), None);
    }

    #[test]
    fn test_assign_then_complete() {
        let mut session = ready_session();
        session.assign(11, &template(), 5000, 5000).unwrap();

        let event =
            session.on_record(r#"{"type":"complete","hashes_computed":5000,"duration_ms":7}"#);
        assert_eq!(
            event,
            Some(SessionEvent::BatchComplete {
                batch_id: 11,
                template_id: 1,
                hashes_computed: 5000,
                duration_ms: 7,
            })
        );
        assert!(session.is_ready());
    }

    #[test]
    fn test_assign_requires_ready() {
        let mut session = ready_session();
        session.assign(1, &template(), 0, 100).unwrap();
        assert!(session.assign(2, &template(), 100, 100).is_err());
    }

    #[test]
    fn test_stop_discards_late_terminal_response() {
        let mut session = ready_session();
        session.assign(20, &template(), 0, 1000).unwrap();

        assert_eq!(session.request_stop(), Some(Command::Stop));
        // Still assigned until the worker acknowledges
        assert_eq!(session.state(), SessionState::Assigned);
        // A second stop has nothing to cancel
        assert_eq!(session.request_stop(), None);

        // Late solution for the cancelled batch is silently dropped
        let event = session.on_record(&format!(
            r#"{{"type":"solution","nonce":5,"hash":"{}"}}"#,
            "0".repeat(64)
        ));
        assert_eq!(event, None);
        assert_eq!(session.state(), SessionState::Assigned);

        let event = session.on_record(r#"{"type":"stopped"}"#);
        assert_eq!(event, Some(SessionEvent::Stopped));
        assert!(session.is_ready());
    }

    #[test]
    fn test_unexpected_stopped_is_violation() {
        let mut session = ready_session();
        session.assign(1, &template(), 0, 100).unwrap();

        let event = session.on_record(r#"{"type":"stopped"}"#);
        assert!(matches!(event, Some(SessionEvent::ProtocolError(_))));
        // The violation does not consume the outstanding batch
        assert_eq!(session.current_batch(), Some(1));
    }

    #[test]
    fn test_solution_while_ready_is_violation() {
        let mut session = ready_session();
        let event = session.on_record(&format!(
            r#"{{"type":"solution","nonce":5,"hash":"{}"}}"#,
            "0".repeat(64)
        ));
        assert!(matches!(event, Some(SessionEvent::ProtocolError(_))));
        assert!(session.is_ready());
    }

    #[test]
    fn test_malformed_record_does_not_change_state() {
        let mut session = ready_session();
        session.assign(1, &template(), 0, 100).unwrap();

        let event = session.on_record("log line that is not json");
        assert!(matches!(event, Some(SessionEvent::ProtocolError(_))));
        assert_eq!(session.state(), SessionState::Assigned);
        assert_eq!(session.current_batch(), Some(1));
    }

    #[test]
    fn test_unknown_type_does_not_change_state() {
        let mut session = ready_session();
        let event = session.on_record(r#"{"type":"hashrate","value":1}"#);
        assert!(matches!(event, Some(SessionEvent::ProtocolError(_))));
        assert!(session.is_ready());
    }

    #[test]
    fn test_info_is_legal_while_assigned() {
        let mut session = ready_session();
        session.assign(1, &template(), 0, 100).unwrap();

        let event = session.on_record(
            r#"{"type":"info","gpus":[{"index":0,"name":"gpu","memory":1,"utilization":1.0,"temperature":50.0}]}"#,
        );
        assert!(matches!(event, Some(SessionEvent::Info(_))));
        assert_eq!(session.state(), SessionState::Assigned);
    }

    #[test]
    fn test_worker_error_resolves_batch() {
        let mut session = ready_session();
        session.assign(30, &template(), 0, 100).unwrap();

        let event = session.on_record(r#"{"type":"error","message":"kernel fault"}"#);
        assert_eq!(
            event,
            Some(SessionEvent::WorkerError {
                message: "kernel fault".to_string(),
                failed_batch: Some(30),
            })
        );
        assert!(session.is_ready());
    }

    #[test]
    fn test_transport_close_while_assigned() {
        let mut session = ready_session();
        session.assign(40, &template(), 0, 100).unwrap();

        assert_eq!(session.on_transport_closed(), Some(40));
        assert!(session.is_terminated());
    }

    #[test]
    fn test_shutdown_ignores_further_records() {
        let mut session = ready_session();
        let command = session.begin_shutdown();
        assert_eq!(command, Command::Shutdown);
        assert_eq!(session.state(), SessionState::ShuttingDown);

        let event = session.on_record(r#"{"type":"stopped"}"#);
        assert_eq!(event, None);

        assert_eq!(session.on_transport_closed(), None);
        assert!(session.is_terminated());
    }
}
