// src/network/node.rs
use crate::miner::{Coordinator, MiningEvent};
use crate::types::{Solution, Target, WorkTemplate};
use crate::utils::error::MinerError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

/// Configuration for connecting to a node's RPC interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// URL of the node's RPC endpoint (e.g., "http://127.0.0.1:1848/json_rpc")
    pub rpc_url: String,
    /// Username for RPC authentication (if required)
    #[serde(default)]
    pub rpc_user: String,
    /// Password for RPC authentication (if required)
    #[serde(default)]
    pub rpc_password: String,
    /// Seconds between work template polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    5
}

/// Client for interacting with a node's RPC interface
///
/// Fetches work templates, pushes them to the coordinator, and submits
/// validated solutions back.
pub struct NodeClient {
    /// Configuration for the node connection
    config: NodeConfig,
    /// HTTP client for making RPC requests
    client: Client,
}

impl NodeClient {
    /// Creates a new NodeClient with the given configuration
    ///
    /// # Errors
    /// Returns `MinerError` if the configured RPC URL does not parse.
    pub fn new(config: NodeConfig) -> Result<Self, MinerError> {
        let url = Url::parse(&config.rpc_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            log::warn!(
                "Node URL '{}' uses non-HTTP scheme '{}'",
                config.rpc_url,
                url.scheme()
            );
        }
        Ok(NodeClient {
            config,
            client: Client::new(),
        })
    }

    /// Requests the current work template from the node
    ///
    /// # Returns
    /// * `Ok(Arc<WorkTemplate>)` - The template the node wants mined
    /// * `Err(MinerError)` - If the RPC call fails or the response is malformed
    pub async fn get_work_template(&self) -> Result<Arc<WorkTemplate>, MinerError> {
        let response = self.rpc_call("getworktemplate", json!({})).await?;

        let result = response["result"]
            .as_object()
            .ok_or_else(|| MinerError::ProtocolError("Missing result object".to_string()))?;

        let id = result["template_id"]
            .as_u64()
            .ok_or_else(|| MinerError::ProtocolError("Missing template_id".to_string()))?;
        let header = hex::decode(
            result["header"]
                .as_str()
                .ok_or_else(|| MinerError::ProtocolError("Missing header".to_string()))?,
        )?;
        let target = Target::from_hex(
            result["target"]
                .as_str()
                .ok_or_else(|| MinerError::ProtocolError("Missing target".to_string()))?,
        )
        .map_err(MinerError::ProtocolError)?;
        let nonce_space = result["nonce_space"]
            .as_u64()
            .ok_or_else(|| MinerError::ProtocolError("Missing nonce_space".to_string()))?;

        Ok(WorkTemplate::shared(id, header, target, nonce_space))
    }

    /// Submits a validated solution to the node
    ///
    /// # Returns
    /// * `Ok(())` - If the submission was accepted
    /// * `Err(MinerError)` - If there was an error submitting the solution
    pub async fn submit_solution(&self, solution: &Solution) -> Result<(), MinerError> {
        let _ = self
            .rpc_call(
                "submitsolution",
                json!({
                    "template_id": solution.template_id,
                    "nonce": solution.nonce,
                    "hash": solution.hash_hex()
                }),
            )
            .await?;
        Ok(())
    }

    /// Drives the coordinator from the node's point of view
    ///
    /// Polls for work templates at the configured interval, preempting the
    /// coordinator whenever the node hands out a new round, and forwards
    /// accepted solutions upstream. Exhaustion triggers an immediate poll;
    /// whether the node widens the target or builds a new header is the
    /// node's decision.
    pub async fn run(
        &self,
        coordinator: Coordinator,
        mut events: UnboundedReceiver<MiningEvent>,
    ) -> Result<(), MinerError> {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.refresh(&coordinator).await;
                }
                event = events.recv() => match event {
                    Some(MiningEvent::SolutionFound(solution)) => {
                        match self.submit_solution(&solution).await {
                            Ok(()) => log::info!(
                                "Submitted solution for template {} (nonce {})",
                                solution.template_id,
                                solution.nonce
                            ),
                            Err(e) => log::error!("Solution submission failed: {}", e),
                        }
                        self.refresh(&coordinator).await;
                    }
                    Some(MiningEvent::SpaceExhausted { template_id }) => {
                        log::warn!(
                            "Template {} exhausted without a solution, requesting new work",
                            template_id
                        );
                        self.refresh(&coordinator).await;
                    }
                    None => return Ok(()),
                }
            }
        }
    }

    /// Fetches the node's template and installs it if it is new
    async fn refresh(&self, coordinator: &Coordinator) {
        match self.get_work_template().await {
            Ok(template) => {
                let active = coordinator.current_template().map(|t| t.id);
                if active != Some(template.id) {
                    coordinator.set_template(template);
                }
            }
            Err(e) => log::warn!("Failed to fetch work template: {}", e),
        }
    }

    /// Makes an RPC call to the node
    ///
    /// # Arguments
    /// * `method` - The RPC method to call
    /// * `params` - Parameters for the RPC call
    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, MinerError> {
        let mut request = self.client.post(&self.config.rpc_url);
        if !self.config.rpc_user.is_empty() {
            request = request.basic_auth(&self.config.rpc_user, Some(&self.config.rpc_password));
        }

        let response = request
            .json(&json!({
                "jsonrpc": "2.0",
                "id": "0",
                "method": method,
                "params": params
            }))
            .send()
            .await?
            .json()
            .await?;

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> NodeConfig {
        NodeConfig {
            rpc_url: url.to_string(),
            rpc_user: String::new(),
            rpc_password: String::new(),
            poll_interval_secs: 5,
        }
    }

    #[test]
    fn test_client_accepts_http_url() {
        assert!(NodeClient::new(config("http://localhost:1848/json_rpc")).is_ok());
    }

    #[test]
    fn test_client_rejects_garbage_url() {
        assert!(NodeClient::new(config("not a url")).is_err());
    }
}
