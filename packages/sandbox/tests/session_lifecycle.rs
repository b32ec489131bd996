// ABOUTME: Integration tests for complete sandbox session lifecycle operations
// ABOUTME: Tests ensure, start, exec, teardown and failure recovery against a runtime double

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chainlab_identity::{LifecycleState, User, UserStorage};
use chainlab_sandbox::{
    CommandRequest, CommandRoute, ContainerRuntime, ErrorKind, ExecOutput, RuntimeError,
    SandboxConfig, SessionOrchestrator,
};

/// In-memory container runtime double. Tracks which containers exist and
/// whether they run, counts calls, and replays a scripted exec output.
#[derive(Default)]
struct FakeRuntime {
    containers: Mutex<HashMap<String, bool>>,
    next_id: AtomicUsize,
    create_calls: AtomicUsize,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    remove_calls: AtomicUsize,
    exec_calls: AtomicUsize,
    exec_stdout: Mutex<Vec<u8>>,
}

impl FakeRuntime {
    fn with_exec_stdout(stdout: &[u8]) -> Self {
        Self {
            exec_stdout: Mutex::new(stdout.to_vec()),
            ..Default::default()
        }
    }

    /// Simulate the container being deleted behind our back.
    fn forget(&self, container_id: &str) {
        self.containers.lock().unwrap().remove(container_id);
    }

    fn require(&self, container_id: &str) -> Result<(), RuntimeError> {
        if self.containers.lock().unwrap().contains_key(container_id) {
            Ok(())
        } else {
            Err(RuntimeError::UnknownContainer(container_id.to_string()))
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn create(
        &self,
        _image: &str,
        _cmd: Option<Vec<String>>,
    ) -> Result<String, RuntimeError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let id = format!("ctr-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.containers.lock().unwrap().insert(id.clone(), false);
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        // Widen the race window for the concurrency tests.
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.require(container_id)?;
        self.containers
            .lock()
            .unwrap()
            .insert(container_id.to_string(), true);
        Ok(())
    }

    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.require(container_id)?;
        self.containers
            .lock()
            .unwrap()
            .insert(container_id.to_string(), false);
        Ok(())
    }

    async fn remove(&self, container_id: &str, _force: bool) -> Result<(), RuntimeError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.require(container_id)?;
        self.containers.lock().unwrap().remove(container_id);
        Ok(())
    }

    async fn exec_attach(
        &self,
        container_id: &str,
        _argv: Vec<String>,
    ) -> Result<ExecOutput, RuntimeError> {
        self.exec_calls.fetch_add(1, Ordering::SeqCst);
        self.require(container_id)?;
        Ok(ExecOutput {
            stdout: self.exec_stdout.lock().unwrap().clone(),
            stderr: Vec::new(),
            exit_code: 0,
        })
    }
}

async fn setup(runtime: Arc<FakeRuntime>) -> (Arc<SessionOrchestrator>, Arc<UserStorage>) {
    // One connection only: every pooled connection would otherwise open its
    // own private in-memory database.
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .expect("Failed to create in-memory database");
    chainlab_identity::MIGRATOR
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let storage = Arc::new(UserStorage::new(pool));
    storage
        .create_user(&User::new("alice", "hash"))
        .await
        .expect("Failed to create test user");

    let config = SandboxConfig {
        image: "sandbox-img".to_string(),
        exec_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let orchestrator = Arc::new(SessionOrchestrator::new(storage.clone(), runtime, config));
    (orchestrator, storage)
}

/// Calling ensure twice never provisions two runtime instances.
#[tokio::test]
async fn test_ensure_sandbox_is_idempotent() {
    let runtime = Arc::new(FakeRuntime::default());
    let (orchestrator, storage) = setup(runtime.clone()).await;

    let first = orchestrator.ensure_sandbox("alice").await.unwrap();
    assert_eq!(first.state, LifecycleState::Created);
    assert!(first.container_id.is_some());

    let second = orchestrator.ensure_sandbox("alice").await.unwrap();
    assert_eq!(second, first);
    assert_eq!(runtime.create_calls.load(Ordering::SeqCst), 1);

    // The provisioned handle is durable, not just in memory.
    let persisted = storage.get_user("alice").await.unwrap().sandbox;
    assert_eq!(persisted, first);
}

/// Starting a running sandbox succeeds without hitting the runtime again.
#[tokio::test]
async fn test_start_running_sandbox_has_no_side_effects() {
    let runtime = Arc::new(FakeRuntime::default());
    let (orchestrator, _) = setup(runtime.clone()).await;

    orchestrator.ensure_sandbox("alice").await.unwrap();
    let started = orchestrator.start_sandbox("alice").await.unwrap();
    assert_eq!(started.state, LifecycleState::Running);

    let again = orchestrator.start_sandbox("alice").await.unwrap();
    assert_eq!(again.state, LifecycleState::Running);

    assert_eq!(runtime.start_calls.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.create_calls.load(Ordering::SeqCst), 1);
}

/// The full happy path: ensure, start, run a command, tear down.
#[tokio::test]
async fn test_full_session_scenario() {
    let runtime = Arc::new(FakeRuntime::with_exec_stdout(b"pong"));
    let (orchestrator, storage) = setup(runtime.clone()).await;

    let handle = orchestrator.ensure_sandbox("alice").await.unwrap();
    assert_eq!(handle.state, LifecycleState::Created);

    let handle = orchestrator.start_sandbox("alice").await.unwrap();
    assert_eq!(handle.state, LifecycleState::Running);

    let result = orchestrator
        .run_command("alice", &CommandRequest::new(CommandRoute::ConsensusStatus))
        .await
        .unwrap();
    assert!(result.succeeded);
    assert_eq!(result.combined_text(), "pong");

    let handle = orchestrator.teardown_sandbox("alice").await.unwrap();
    assert_eq!(handle.state, LifecycleState::Removed);
    assert!(handle.container_id.is_none());

    let persisted = storage.get_user("alice").await.unwrap().sandbox;
    assert_eq!(persisted.state, LifecycleState::Removed);
    assert!(persisted.container_id.is_none());
}

/// Teardown keeps working once everything is already gone.
#[tokio::test]
async fn test_teardown_is_idempotent() {
    let runtime = Arc::new(FakeRuntime::default());
    let (orchestrator, _) = setup(runtime.clone()).await;

    // Never provisioned: nothing to do, not an error.
    let handle = orchestrator.teardown_sandbox("alice").await.unwrap();
    assert_eq!(handle.state, LifecycleState::Unprovisioned);

    orchestrator.ensure_sandbox("alice").await.unwrap();
    orchestrator.start_sandbox("alice").await.unwrap();

    let first = orchestrator.teardown_sandbox("alice").await.unwrap();
    assert_eq!(first.state, LifecycleState::Removed);

    let second = orchestrator.teardown_sandbox("alice").await.unwrap();
    assert_eq!(second.state, LifecycleState::Removed);
    assert_eq!(runtime.remove_calls.load(Ordering::SeqCst), 1);
}

/// Commands against a sandbox that is not running are rejected before any
/// exec call is attempted.
#[tokio::test]
async fn test_run_command_requires_running() {
    let runtime = Arc::new(FakeRuntime::default());
    let (orchestrator, _) = setup(runtime.clone()).await;

    let request = CommandRequest::new(CommandRoute::TxpoolStatus);

    let err = orchestrator.run_command("alice", &request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);

    orchestrator.ensure_sandbox("alice").await.unwrap();
    orchestrator.start_sandbox("alice").await.unwrap();
    orchestrator.stop_sandbox("alice").await.unwrap();

    let err = orchestrator.run_command("alice", &request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);

    assert_eq!(runtime.exec_calls.load(Ordering::SeqCst), 0);
}

/// An externally-deleted container surfaces as a stale handle, the record
/// resets, and the next ensure provisions a fresh instance.
#[tokio::test]
async fn test_stale_handle_resets_and_reprovisions() {
    let runtime = Arc::new(FakeRuntime::default());
    let (orchestrator, storage) = setup(runtime.clone()).await;

    orchestrator.ensure_sandbox("alice").await.unwrap();
    let handle = orchestrator.start_sandbox("alice").await.unwrap();
    let container_id = handle.container_id.clone().unwrap();

    runtime.forget(&container_id);

    let err = orchestrator
        .run_command("alice", &CommandRequest::new(CommandRoute::ConsensusStatus))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StaleHandle);

    let persisted = storage.get_user("alice").await.unwrap().sandbox;
    assert_eq!(persisted.state, LifecycleState::Unprovisioned);
    assert!(persisted.container_id.is_none());

    let fresh = orchestrator.ensure_sandbox("alice").await.unwrap();
    assert_eq!(fresh.state, LifecycleState::Created);
    assert_ne!(fresh.container_id.as_deref(), Some(container_id.as_str()));
    assert_eq!(runtime.create_calls.load(Ordering::SeqCst), 2);
}

/// A stale handle discovered on start resets the record the same way.
#[tokio::test]
async fn test_stale_handle_on_start() {
    let runtime = Arc::new(FakeRuntime::default());
    let (orchestrator, storage) = setup(runtime.clone()).await;

    let handle = orchestrator.ensure_sandbox("alice").await.unwrap();
    runtime.forget(handle.container_id.as_deref().unwrap());

    let err = orchestrator.start_sandbox("alice").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StaleHandle);

    let persisted = storage.get_user("alice").await.unwrap().sandbox;
    assert_eq!(persisted.state, LifecycleState::Unprovisioned);
}

/// Concurrent start and teardown for one owner serialize; the persisted
/// record always lands in exactly one of the two outcomes and never in a
/// mixed state such as running with no container id.
#[tokio::test]
async fn test_concurrent_start_and_teardown_serialize() {
    for _ in 0..10 {
        let runtime = Arc::new(FakeRuntime::default());
        let (orchestrator, storage) = setup(runtime.clone()).await;

        orchestrator.ensure_sandbox("alice").await.unwrap();

        let start = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.start_sandbox("alice").await })
        };
        let teardown = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.teardown_sandbox("alice").await })
        };

        let start_result = start.await.expect("start task panicked");
        let teardown_result = teardown.await.expect("teardown task panicked");

        // Teardown always wins eventually; start either got in first or
        // found the sandbox already removed.
        assert!(teardown_result.is_ok());
        match start_result {
            Ok(handle) => assert_eq!(handle.state, LifecycleState::Running),
            Err(err) => assert_eq!(err.kind(), ErrorKind::Conflict),
        }

        let persisted = storage.get_user("alice").await.unwrap().sandbox;
        match persisted.state {
            LifecycleState::Removed => assert!(persisted.container_id.is_none()),
            LifecycleState::Running => assert!(persisted.container_id.is_some()),
            other => panic!("unexpected final state: {other:?}"),
        }
    }
}

/// Operations for different owners do not contend with each other.
#[tokio::test]
async fn test_cross_owner_operations_are_independent() {
    let runtime = Arc::new(FakeRuntime::default());
    let (orchestrator, storage) = setup(runtime.clone()).await;
    storage
        .create_user(&User::new("bob", "hash"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for owner in ["alice", "bob"] {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.ensure_sandbox(owner).await.unwrap();
            orchestrator.start_sandbox(owner).await.unwrap()
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        let sandbox = handle.await.expect("task panicked");
        assert_eq!(sandbox.state, LifecycleState::Running);
        ids.push(sandbox.container_id.unwrap());
    }
    assert_ne!(ids[0], ids[1]);
    assert_eq!(runtime.create_calls.load(Ordering::SeqCst), 2);
}

/// Unknown owners are rejected up front.
#[tokio::test]
async fn test_unknown_owner() {
    let runtime = Arc::new(FakeRuntime::default());
    let (orchestrator, _) = setup(runtime).await;

    let err = orchestrator.ensure_sandbox("mallory").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
