// ABOUTME: Command bridge translating logical routes into in-sandbox HTTP requests
// ABOUTME: Executes via runtime exec-attach, demuxes output and classifies the result

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Result, SandboxError};
use crate::runtime::{ContainerRuntime, RuntimeError};

/// Prefix curl prints when the request itself failed (connection refused,
/// DNS, timeout...), as opposed to the control plane answering with an
/// error body.
const TRANSPORT_FAILURE_SIGNATURE: &str = "curl: (";

/// The closed set of control-plane endpoints reachable from outside.
///
/// Unknown routes are rejected at deserialization time and never reach the
/// sandbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum CommandRoute {
    /// Consensus state of the learner's local cluster.
    ConsensusStatus,
    /// Transaction pool state.
    TxpoolStatus,
    /// Block at a given height.
    BlockAtHeight { height: u64 },
    /// Initialize the local cluster factory.
    ClusterFactory {
        node_count: u32,
        stake_quota: u32,
        window_size: u32,
    },
    /// Generate local point and topic addresses.
    LocalAddresses,
    /// Generate validator keys and stake quotas.
    ValidatorKeys,
    /// Write genesis files from the template.
    GenesisFiles,
    /// Create the templated cluster.
    ClusterCreate,
    /// Build the blockchain binary inside the sandbox.
    ChainBuild,
    /// Inspect a node's working directory (genesis.json).
    NodeWorkdir { node: u32 },
    ClusterStart,
    ClusterStop,
    /// Run a shell command through the control plane's /execute endpoint.
    Shell { command: String },
}

impl CommandRoute {
    pub fn method(&self) -> &'static str {
        match self {
            Self::ConsensusStatus
            | Self::TxpoolStatus
            | Self::BlockAtHeight { .. }
            | Self::NodeWorkdir { .. } => "GET",
            _ => "POST",
        }
    }

    pub fn path(&self) -> String {
        match self {
            Self::ConsensusStatus => "/proxy/-1/consensus".to_string(),
            Self::TxpoolStatus => "/proxy/-1/txpool".to_string(),
            Self::BlockAtHeight { height } => format!("/proxy/-1/blocks/height/{height}"),
            Self::ClusterFactory { .. } => "/setup/factory".to_string(),
            Self::LocalAddresses => "/setup/addrs".to_string(),
            Self::ValidatorKeys => "/setup/random".to_string(),
            Self::GenesisFiles => "/setup/template".to_string(),
            Self::ClusterCreate => "/setup/cluster/create".to_string(),
            Self::ChainBuild => "/setup/build/chain".to_string(),
            Self::NodeWorkdir { node } => format!("/workdir/{node}/genesis.json"),
            Self::ClusterStart => "/setup/cluster/start".to_string(),
            Self::ClusterStop => "/setup/cluster/stop".to_string(),
            Self::Shell { .. } => "/execute".to_string(),
        }
    }

    /// Request body implied by the route itself, if any.
    pub fn body(&self) -> Option<Value> {
        match self {
            Self::ClusterFactory {
                node_count,
                stake_quota,
                window_size,
            } => Some(json!({
                "nodeCount": node_count,
                "stakeQuota": stake_quota,
                "windowSize": window_size,
            })),
            Self::Shell { command } => Some(json!({ "cmd": command })),
            _ => None,
        }
    }
}

/// One logical command to run against a sandbox. Not persisted.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub route: CommandRoute,
    /// Raw body override; when `None` the route's implied body is used.
    pub payload: Option<Vec<u8>>,
}

impl CommandRequest {
    pub fn new(route: CommandRoute) -> Self {
        Self {
            route,
            payload: None,
        }
    }
}

/// Captured result of one bridged command. Not persisted.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub succeeded: bool,
}

impl CommandResult {
    /// Textual rendering: stdout, then stderr appended only when non-empty,
    /// so callers can tell "produced output" from "also logged diagnostics"
    /// without losing either.
    pub fn combined_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        if !self.stderr.is_empty() {
            text.push_str("\nError output: ");
            text.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        text
    }
}

/// Bridges logical commands into a sandbox through exec-and-capture.
///
/// An application-level error body still counts as a completed command;
/// only a failure to reach the control plane at all is an error here.
pub struct CommandBridge {
    runtime: Arc<dyn ContainerRuntime>,
    control_port: u16,
}

impl CommandBridge {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, control_port: u16) -> Self {
        Self {
            runtime,
            control_port,
        }
    }

    /// Run `request` inside the container, bounded by `deadline`.
    ///
    /// On deadline expiry the in-sandbox side effect may or may not have
    /// completed; callers must tolerate at-most-once-attempted semantics.
    pub async fn execute(
        &self,
        container_id: &str,
        request: &CommandRequest,
        deadline: Duration,
    ) -> Result<CommandResult> {
        let argv = self.build_argv(request);
        debug!(container = %container_id, route = ?request.route, "Bridging command");

        let exec = tokio::time::timeout(deadline, self.runtime.exec_attach(container_id, argv))
            .await
            .map_err(|_| SandboxError::ExecTimeout(deadline))?
            .map_err(|err| match err {
                RuntimeError::Unavailable(msg) => SandboxError::RuntimeUnavailable(msg),
                RuntimeError::UnknownContainer(_) => {
                    SandboxError::StaleHandle(container_id.to_string())
                }
                RuntimeError::Failed(msg) => SandboxError::Runtime(msg),
            })?;

        let result = CommandResult {
            stdout: exec.stdout,
            stderr: exec.stderr,
            succeeded: true,
        };

        let combined = result.combined_text();
        if combined.contains(TRANSPORT_FAILURE_SIGNATURE) {
            return Err(SandboxError::Transport(combined));
        }

        Ok(result)
    }

    /// Equivalent of issuing an HTTP request to the fixed local port inside
    /// the sandbox.
    fn build_argv(&self, request: &CommandRequest) -> Vec<String> {
        let route = &request.route;
        let mut argv = vec![
            "curl".to_string(),
            "-sS".to_string(),
            "-X".to_string(),
            route.method().to_string(),
            "-H".to_string(),
            "Content-Type: application/json".to_string(),
        ];

        let body = match &request.payload {
            Some(raw) if !raw.is_empty() => Some(String::from_utf8_lossy(raw).into_owned()),
            _ => route.body().map(|v| v.to_string()),
        };
        if let Some(body) = body {
            argv.push("-d".to_string());
            argv.push(body);
        }

        argv.push(format!(
            "http://localhost:{}{}",
            self.control_port,
            route.path()
        ));
        argv
    }
}
