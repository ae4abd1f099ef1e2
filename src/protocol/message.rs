// src/protocol/message.rs
use serde::{Deserialize, Serialize};

/// Requests the coordinator sends to a worker process
///
/// Serialized as a flat JSON object with a `type` discriminator, e.g.
/// `{"type":"mine","work":"..","target":"..","start_nonce":0,"nonce_count":1000}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Negotiate capabilities; `batch_size` is a hint the worker may lower
    Init {
        /// Preferred nonces per batch
        batch_size: u64,
    },

    /// Assign one nonce batch of the current work template
    Mine {
        /// Header bytes, hex encoded
        work: String,
        /// Difficulty target, hex encoded
        target: String,
        /// First nonce of the batch
        start_nonce: u64,
        /// Number of nonces in the batch
        nonce_count: u64,
    },

    /// Cancel the batch currently being mined
    Stop,

    /// Request a device status report
    QueryInfo,

    /// Terminate the worker process
    Shutdown,
}

/// Responses a worker process sends back to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Report {
    /// Capability report answering `init`
    Initialized {
        /// Number of GPUs the worker controls
        gpu_count: u32,
        /// Total device memory in bytes
        total_memory: u64,
        /// Largest batch the worker accepts
        max_batch_size: u64,
    },

    /// Candidate solution found inside the assigned batch
    Solution {
        /// Winning nonce
        nonce: u64,
        /// Resulting hash, 64 hex characters
        hash: String,
    },

    /// Batch exhausted without a solution
    Complete {
        /// Nonces actually hashed
        hashes_computed: u64,
        /// Time spent on the batch
        duration_ms: u64,
    },

    /// Acknowledges a `stop`
    Stopped,

    /// Device status answering `query_info`
    Info {
        /// One entry per GPU
        gpus: Vec<GpuInfo>,
    },

    /// Worker-reported failure; not fatal to the session
    Error {
        /// Human-readable description
        message: String,
    },
}

/// Status of a single GPU as reported by `info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuInfo {
    /// Device index on the worker
    pub index: u32,
    /// Device name
    pub name: String,
    /// Device memory in bytes
    pub memory: u64,
    /// Utilization percentage
    pub utilization: f64,
    /// Temperature in degrees Celsius
    pub temperature: f64,
}
