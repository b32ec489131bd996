// ABOUTME: Container runtime trait consumed by the lifecycle manager and bridge
// ABOUTME: Defines the abstract interface for container backends plus exec output

use async_trait::async_trait;
use thiserror::Error;

pub mod docker;

pub use docker::DockerRuntime;

#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Daemon unreachable or not responding; callers may retry.
    #[error("Runtime unavailable: {0}")]
    Unavailable(String),

    /// The runtime no longer knows this container id.
    #[error("Unknown container: {0}")]
    UnknownContainer(String),

    /// The runtime rejected or failed the operation.
    #[error("Runtime operation failed: {0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Captured output of a process run inside a container.
///
/// The runtime multiplexes stdout and stderr on one channel; implementations
/// demultiplex into the two buffers here.
#[derive(Debug, Default, Clone)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i64,
}

/// Container backend consumed by the lifecycle manager and command bridge.
///
/// The trait is the seam for test doubles; the production implementation is
/// [`DockerRuntime`].
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Probe daemon availability.
    async fn ping(&self) -> Result<()>;

    /// Create a container from `image` without starting it; returns the
    /// runtime's opaque container id.
    async fn create(&self, image: &str, cmd: Option<Vec<String>>) -> Result<String>;

    /// Start a created or stopped container. Starting an already-running
    /// container is a no-op success.
    async fn start(&self, container_id: &str) -> Result<()>;

    /// Stop a running container. Stopping an already-stopped container is a
    /// no-op success.
    async fn stop(&self, container_id: &str) -> Result<()>;

    /// Remove a container, forcibly if requested.
    async fn remove(&self, container_id: &str, force: bool) -> Result<()>;

    /// Spawn `argv` inside a running container, wait for it to exit and
    /// collect its demultiplexed output.
    async fn exec_attach(&self, container_id: &str, argv: Vec<String>) -> Result<ExecOutput>;
}
