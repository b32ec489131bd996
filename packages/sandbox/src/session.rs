// ABOUTME: Session orchestrator binding authenticated identities to sandboxes
// ABOUTME: Serializes per-owner operations and persists handle updates before reporting

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chainlab_identity::{LifecycleState, SandboxHandle, StorageError, UserStorage};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::bridge::{CommandBridge, CommandRequest, CommandResult};
use crate::error::{Result, SandboxError};
use crate::lifecycle::LifecycleManager;
use crate::runtime::ContainerRuntime;
use crate::{DEFAULT_CONTROL_PORT, DEFAULT_EXEC_TIMEOUT_SECS, DEFAULT_SANDBOX_IMAGE};

/// Static configuration for the sandboxes this orchestrator provisions.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub image: String,
    /// Entrypoint override for the sandbox container, if any.
    pub command: Option<Vec<String>>,
    pub control_port: u16,
    pub exec_timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_SANDBOX_IMAGE.to_string(),
            command: None,
            control_port: DEFAULT_CONTROL_PORT,
            exec_timeout: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
        }
    }
}

/// The only entry point external callers use.
///
/// Owns all identity-store writes: the lifecycle manager and the bridge
/// return outcomes, and every handle mutation is persisted here before
/// success is reported (write-then-report). There is no transactional
/// boundary spanning the runtime and the store, so a persistence failure
/// after a successful runtime call surfaces as `Inconsistent`.
pub struct SessionOrchestrator {
    storage: Arc<UserStorage>,
    lifecycle: LifecycleManager,
    bridge: CommandBridge,
    config: SandboxConfig,
    /// Per-owner serialization. The runtime offers no compare-and-swap on
    /// container state, so concurrent operations against one owner must
    /// queue here; operations across owners proceed in parallel.
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionOrchestrator {
    pub fn new(
        storage: Arc<UserStorage>,
        runtime: Arc<dyn ContainerRuntime>,
        config: SandboxConfig,
    ) -> Self {
        let lifecycle = LifecycleManager::new(runtime.clone());
        let bridge = CommandBridge::new(runtime, config.control_port);
        Self {
            storage,
            lifecycle,
            bridge,
            config,
            locks: RwLock::new(HashMap::new()),
        }
    }

    async fn owner_lock(&self, owner_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(owner_id) {
            return lock.clone();
        }
        let mut locks = self.locks.write().await;
        locks
            .entry(owner_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Re-read the handle from the store; never act on stale in-memory
    /// state across process restarts.
    async fn load_handle(&self, owner_id: &str) -> Result<SandboxHandle> {
        let user = self.storage.get_user(owner_id).await.map_err(|err| match err {
            StorageError::NotFound(id) => SandboxError::NotFound(id),
            other => other.into(),
        })?;
        Ok(user.sandbox)
    }

    /// Persist a mutated handle. By the time this is called the runtime
    /// side effect has already happened, so a store failure leaves the two
    /// diverged and needs out-of-band reconciliation.
    async fn persist(&self, handle: &SandboxHandle) -> Result<()> {
        self.storage.update_handle(handle).await.map_err(|err| {
            error!(
                owner = %handle.owner_id,
                state = handle.state.as_str(),
                %err,
                "Sandbox state changed in the runtime but could not be persisted; reconcile out of band"
            );
            SandboxError::Inconsistent(format!(
                "Sandbox for {} reached {} but the record was not persisted: {err}",
                handle.owner_id,
                handle.state.as_str()
            ))
        })
    }

    /// Reset a handle whose backing container vanished externally, then
    /// re-surface the original error.
    async fn reset_stale(&self, mut handle: SandboxHandle, err: SandboxError) -> SandboxError {
        warn!(
            owner = %handle.owner_id,
            "Backing container vanished; resetting handle to unprovisioned"
        );
        handle.reset();
        match self.persist(&handle).await {
            Ok(()) => err,
            Err(persist_err) => persist_err,
        }
    }

    /// Load or lazily create the owner's sandbox. Provisions (and persists)
    /// when no instance is recorded; otherwise returns the handle unchanged.
    /// Calling twice never creates a second instance.
    pub async fn ensure_sandbox(&self, owner_id: &str) -> Result<SandboxHandle> {
        let lock = self.owner_lock(owner_id).await;
        let _guard = lock.lock().await;

        let mut handle = self.load_handle(owner_id).await?;
        if matches!(
            handle.state,
            LifecycleState::Unprovisioned | LifecycleState::Removed
        ) {
            self.lifecycle
                .provision(&mut handle, &self.config.image, self.config.command.clone())
                .await?;
            self.persist(&handle).await?;
            info!(owner = %owner_id, "Sandbox provisioned");
        }
        Ok(handle)
    }

    pub async fn start_sandbox(&self, owner_id: &str) -> Result<SandboxHandle> {
        let lock = self.owner_lock(owner_id).await;
        let _guard = lock.lock().await;

        let mut handle = self.load_handle(owner_id).await?;
        let before = handle.state;
        match self.lifecycle.start(&mut handle).await {
            Ok(()) => {
                if handle.state != before {
                    self.persist(&handle).await?;
                }
                Ok(handle)
            }
            Err(err @ SandboxError::StaleHandle(_)) => Err(self.reset_stale(handle, err).await),
            Err(err) => Err(err),
        }
    }

    pub async fn stop_sandbox(&self, owner_id: &str) -> Result<SandboxHandle> {
        let lock = self.owner_lock(owner_id).await;
        let _guard = lock.lock().await;

        let mut handle = self.load_handle(owner_id).await?;
        let before = handle.state;
        match self.lifecycle.stop(&mut handle).await {
            Ok(()) => {
                if handle.state != before {
                    self.persist(&handle).await?;
                }
                Ok(handle)
            }
            Err(err @ SandboxError::StaleHandle(_)) => Err(self.reset_stale(handle, err).await),
            Err(err) => Err(err),
        }
    }

    /// Bridge one command into the owner's sandbox. Requires `Running`;
    /// nothing is executed otherwise.
    pub async fn run_command(
        &self,
        owner_id: &str,
        request: &CommandRequest,
    ) -> Result<CommandResult> {
        let lock = self.owner_lock(owner_id).await;
        let _guard = lock.lock().await;

        let handle = self.load_handle(owner_id).await?;
        if handle.state != LifecycleState::Running {
            return Err(SandboxError::NotReady(format!(
                "Sandbox for {} is {}",
                owner_id,
                handle.state.as_str()
            )));
        }
        let container_id = handle.container_id.clone().ok_or_else(|| {
            SandboxError::Inconsistent(format!(
                "Handle for {owner_id} is running but records no container id"
            ))
        })?;

        match self
            .bridge
            .execute(&container_id, request, self.config.exec_timeout)
            .await
        {
            Err(err @ SandboxError::StaleHandle(_)) => Err(self.reset_stale(handle, err).await),
            other => other,
        }
    }

    /// Stop-then-remove, tolerating a sandbox that is already stopped,
    /// already removed, or never provisioned. Cleanup paths must keep
    /// working after partial prior failures.
    pub async fn teardown_sandbox(&self, owner_id: &str) -> Result<SandboxHandle> {
        let lock = self.owner_lock(owner_id).await;
        let _guard = lock.lock().await;

        let mut handle = self.load_handle(owner_id).await?;
        if matches!(
            handle.state,
            LifecycleState::Unprovisioned | LifecycleState::Removed
        ) {
            return Ok(handle);
        }

        if handle.state == LifecycleState::Running {
            match self.lifecycle.stop(&mut handle).await {
                Ok(()) => {}
                // Already gone is exactly what teardown wants.
                Err(SandboxError::StaleHandle(_)) => {}
                Err(err) => return Err(err),
            }
        }

        match self.lifecycle.remove(&mut handle, true).await {
            Ok(()) => {}
            Err(SandboxError::StaleHandle(_)) => {}
            Err(err) => return Err(err),
        }

        handle.container_id = None;
        handle.state = LifecycleState::Removed;
        self.persist(&handle).await?;
        info!(owner = %owner_id, "Sandbox torn down");
        Ok(handle)
    }

    /// Read-only view of the owner's current handle.
    pub async fn get_sandbox(&self, owner_id: &str) -> Result<SandboxHandle> {
        self.load_handle(owner_id).await
    }
}
