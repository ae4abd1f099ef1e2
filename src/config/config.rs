// src/config/config.rs
use crate::{
    miner::coordinator::CoordinatorConfig, network::node::NodeConfig, utils::error::MinerError,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure for the coordinator
///
/// Contains all settings needed to drive a fleet of external workers:
/// coordinator tuning, the worker processes to spawn, and the node the
/// coordinator mines against.
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator tuning (batch sizing, timeouts, verification policy)
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// External worker processes to spawn at startup
    #[serde(default)]
    pub workers: Vec<WorkerSpec>,

    /// Node RPC connection settings
    pub node: NodeConfig,
}

/// How to launch one kind of external worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Program to execute
    pub command: String,

    /// Additional command line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables to set for the process
    #[serde(default)]
    pub env: Vec<(String, String)>,

    /// How many copies of this worker to spawn
    #[serde(default = "default_worker_count")]
    pub count: u32,
}

fn default_worker_count() -> u32 {
    1
}

impl Config {
    /// Loads configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Ok(Config)` - Successfully loaded configuration
    /// * `Err(MinerError)` - If file couldn't be read or parsed
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MinerError> {
        let path = path.into();
        let config_str = std::fs::read_to_string(&path).map_err(|e| {
            MinerError::ConfigError(format!(
                "Failed to read config at {}: {}",
                path.display(),
                e
            ))
        })?;

        toml::from_str(&config_str)
            .map_err(|e| MinerError::ConfigError(format!("Invalid config format: {}", e)))
    }

    /// Rejects configurations that cannot possibly mine
    pub fn validate(&self) -> Result<(), MinerError> {
        if self.workers.is_empty() || self.workers.iter().all(|w| w.count == 0) {
            return Err(MinerError::ConfigError(
                "At least one worker process must be configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Generates a configuration template string
    ///
    /// # Arguments
    /// * `node` - Include the node RPC configuration section
    ///
    /// # Returns
    /// String containing a commented TOML configuration template
    pub fn generate_template(node: bool) -> String {
        let mut template = String::new();
        template.push_str("# Hive Miner Configuration\n\n");
        template.push_str("[coordinator]\n");
        template.push_str("# Nonce batch size before a worker reports its own maximum\n");
        template.push_str("default_batch_size = 1000000\n");
        template.push_str("# Seconds a worker gets to answer an assigned batch\n");
        template.push_str("batch_timeout_secs = 30\n");
        template.push_str("# Seconds a worker gets to report capabilities\n");
        template.push_str("init_timeout_secs = 10\n");
        template.push_str("# Re-derive claimed hashes before accepting a solution\n");
        template.push_str("verify_solutions = true\n");
        template.push_str("# Consecutive rejected claims before a worker is dropped\n");
        template.push_str("max_bad_claims = 3\n\n");

        template.push_str("# One section per worker process\n");
        template.push_str("[[workers]]\n");
        template.push_str("command = \"./gpu-worker\"\n");
        template.push_str("args = [\"--device\", \"0\"]\n");
        template.push_str("# count = 1\n");

        if node {
            template.push_str("\n# Node RPC configuration\n");
            template.push_str("[node]\n");
            template.push_str("rpc_url = \"http://localhost:1848/json_rpc\"\n");
            template.push_str("rpc_user = \"\"\n");
            template.push_str("rpc_password = \"\"\n");
            template.push_str("# Seconds between work template polls\n");
            template.push_str("poll_interval_secs = 5\n");
        }

        template
    }
}
