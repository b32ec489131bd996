// ABOUTME: Lifecycle manager mapping desired sandbox transitions onto runtime calls
// ABOUTME: Enforces state preconditions and translates runtime failures into the taxonomy

use std::sync::Arc;

use chainlab_identity::{LifecycleState, SandboxHandle};
use tracing::info;

use crate::error::{Result, SandboxError};
use crate::runtime::{ContainerRuntime, RuntimeError};

/// Wraps the container runtime with the one-sandbox-per-user state machine.
///
/// Every successful call mutates the passed handle in memory; persisting the
/// mutation (and deciding whether a failure warrants a handle reset) is the
/// orchestrator's job. No call here retries internally.
pub struct LifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
}

impl LifecycleManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Create the backing container for an unprovisioned handle.
    ///
    /// A handle that already has an instance is a conflict; the runtime has
    /// no notion of one-sandbox-per-user, so the check lives here.
    pub async fn provision(
        &self,
        handle: &mut SandboxHandle,
        image: &str,
        cmd: Option<Vec<String>>,
    ) -> Result<()> {
        match handle.state {
            LifecycleState::Unprovisioned | LifecycleState::Removed => {}
            state => {
                return Err(SandboxError::Conflict(format!(
                    "Sandbox for {} already provisioned (state: {})",
                    handle.owner_id,
                    state.as_str()
                )))
            }
        }

        let container_id = self
            .runtime
            .create(image, cmd)
            .await
            .map_err(|err| map_runtime_error(err, "<none>"))?;

        info!(
            owner = %handle.owner_id,
            container = %container_id,
            "Provisioned sandbox"
        );

        handle.container_id = Some(container_id);
        handle.state = LifecycleState::Created;
        Ok(())
    }

    /// Start the backing container. Idempotent from `Running`: callers may
    /// retry after an ambiguous prior response without touching the runtime
    /// again.
    pub async fn start(&self, handle: &mut SandboxHandle) -> Result<()> {
        match handle.state {
            LifecycleState::Running => return Ok(()),
            LifecycleState::Created | LifecycleState::Stopped => {}
            state => {
                return Err(SandboxError::Conflict(format!(
                    "Cannot start sandbox for {} in state {}",
                    handle.owner_id,
                    state.as_str()
                )))
            }
        }

        let container_id = require_instance(handle)?;
        self.runtime
            .start(&container_id)
            .await
            .map_err(|err| map_runtime_error(err, &container_id))?;

        handle.state = LifecycleState::Running;
        Ok(())
    }

    /// Stop the backing container. Idempotent from `Stopped`.
    pub async fn stop(&self, handle: &mut SandboxHandle) -> Result<()> {
        match handle.state {
            LifecycleState::Stopped => return Ok(()),
            LifecycleState::Running => {}
            state => {
                return Err(SandboxError::Conflict(format!(
                    "Cannot stop sandbox for {} in state {}",
                    handle.owner_id,
                    state.as_str()
                )))
            }
        }

        let container_id = require_instance(handle)?;
        self.runtime
            .stop(&container_id)
            .await
            .map_err(|err| map_runtime_error(err, &container_id))?;

        handle.state = LifecycleState::Stopped;
        Ok(())
    }

    /// Remove the backing container, forcibly if requested. Valid from any
    /// provisioned state; the primary failure mode this guards against is an
    /// orphaned sandbox outliving its owner's session.
    pub async fn remove(&self, handle: &mut SandboxHandle, force: bool) -> Result<()> {
        match handle.state {
            LifecycleState::Created | LifecycleState::Running | LifecycleState::Stopped => {}
            state => {
                return Err(SandboxError::Conflict(format!(
                    "Cannot remove sandbox for {} in state {}",
                    handle.owner_id,
                    state.as_str()
                )))
            }
        }

        let container_id = require_instance(handle)?;
        self.runtime
            .remove(&container_id, force)
            .await
            .map_err(|err| map_runtime_error(err, &container_id))?;

        info!(owner = %handle.owner_id, container = %container_id, "Removed sandbox");

        handle.container_id = None;
        handle.state = LifecycleState::Removed;
        Ok(())
    }
}

/// A provisioned state with no recorded instance means the durable record is
/// corrupt; surface it rather than guessing.
fn require_instance(handle: &SandboxHandle) -> Result<String> {
    handle.container_id.clone().ok_or_else(|| {
        SandboxError::Inconsistent(format!(
            "Handle for {} is {} but records no container id",
            handle.owner_id,
            handle.state.as_str()
        ))
    })
}

fn map_runtime_error(err: RuntimeError, container_id: &str) -> SandboxError {
    match err {
        RuntimeError::Unavailable(msg) => SandboxError::RuntimeUnavailable(msg),
        RuntimeError::UnknownContainer(_) => SandboxError::StaleHandle(container_id.to_string()),
        RuntimeError::Failed(msg) => SandboxError::Runtime(msg),
    }
}
