// src/worker/mod.rs
//! Worker process management
//!
//! Each external worker is owned through two pieces:
//! - [`transport`]: the byte stream to the process, framed into line records
//! - [`session`]: the lifecycle state machine enforcing legal message
//!   sequences on top of a transport
//!
//! The transport never interprets message content; the session never touches
//! I/O. The coordinator wires the two together.

/// Line-framed duplex stream to one worker process
pub mod transport;

/// Per-worker lifecycle state machine
pub mod session;

// Re-export main components for cleaner imports
pub use session::{SessionEvent, SessionState, WorkerCaps, WorkerId, WorkerSession};
pub use transport::{RecordSink, RecordStream, TransportError, WorkerProcess};
