// ABOUTME: Sandbox lifecycle management and command bridging for Chainlab
// ABOUTME: Binds each user to one Docker-backed sandbox and drives its control plane

pub mod bridge;
pub mod error;
pub mod lifecycle;
pub mod runtime;
pub mod session;

pub use bridge::{CommandBridge, CommandRequest, CommandResult, CommandRoute};
pub use error::{ErrorKind, SandboxError};
pub use lifecycle::LifecycleManager;
pub use runtime::{ContainerRuntime, DockerRuntime, ExecOutput, RuntimeError};
pub use session::{SandboxConfig, SessionOrchestrator};

/// Image the teaching-exercise control plane ships in.
pub const DEFAULT_SANDBOX_IMAGE: &str = "chain-proxy";
/// Port the control plane listens on inside the sandbox.
pub const DEFAULT_CONTROL_PORT: u16 = 8080;
/// Default deadline for a single bridged command.
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;
